//! Lending API operations and their response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cache::{FieldPolicy, TypePolicies};

/// Books available for checkout, filtered and offset-paginated
pub const GET_AVAILABLE_BOOKS: &str = r#"
query GetAvailableBooks($searchString: String, $typeCode: String, $offset: Int, $limit: Int) {
  getAvailableBooks(searchString: $searchString, typeCode: $typeCode, offset: $offset, limit: $limit) {
    id
    title
    cover_url
    price
  }
}
"#;

/// Checkouts of the signed-in user
pub const GET_USER_CHECKOUTS: &str = r#"
query GetUserCheckouts {
  getUserCheckouts {
    id
    total_price
    status
    return_date
    orders {
      id
      books {
        id
        title
        cover_url
        price
      }
    }
  }
}
"#;

pub const SIGNUP_MUTATION: &str = r#"
mutation Signup($name: String!, $email: String!, $password: String!) {
  signup(name: $name, email: $email, password: $password) {
    token
    user {
      name
      email
    }
    errors {
      path
      message
    }
  }
}
"#;

/// Cache policies of the lending API.
///
/// `getAvailableBooks` results are keyed on the filter only, so successive
/// offsets accumulate in one list.
pub fn lending_type_policies() -> TypePolicies {
    TypePolicies::new().with_field(
        "Query",
        "getAvailableBooks",
        FieldPolicy::paginated(["searchString", "typeCode"]),
    )
}

/// Server ids arrive as numbers or strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Int(id) => write!(f, "{id}"),
            Id::Str(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: Id,
    pub title: Option<String>,
    pub cover_url: Option<String>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableBooksData {
    #[serde(default)]
    pub get_available_books: Vec<Book>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CheckoutStatus {
    Open,
    Closed,
    Other(String),
}

impl From<String> for CheckoutStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "open" => Self::Open,
            "closed" => Self::Closed,
            _ => Self::Other(value),
        }
    }
}

impl From<CheckoutStatus> for String {
    fn from(status: CheckoutStatus) -> Self {
        match status {
            CheckoutStatus::Open => "open".to_string(),
            CheckoutStatus::Closed => "closed".to_string(),
            CheckoutStatus::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Id,
    pub books: Option<Book>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkout {
    pub id: Id,
    pub total_price: Option<f64>,
    pub status: CheckoutStatus,
    pub return_date: Option<String>,
    pub orders: Option<Order>,
}

impl Checkout {
    pub fn is_open(&self) -> bool {
        self.status == CheckoutStatus::Open
    }

    /// Return date as RFC 3339 or as epoch milliseconds
    pub fn return_date(&self) -> Option<DateTime<Utc>> {
        let raw = self.return_date.as_deref()?.trim();
        if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
            return Some(date.with_timezone(&Utc));
        }
        raw.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
    }

    pub fn book(&self) -> Option<&Book> {
        self.orders.as_ref().and_then(|o| o.books.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCheckoutsData {
    #[serde(default)]
    pub get_user_checkouts: Vec<Checkout>,
}

/// Business-rule error reported by a mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFieldError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupUser {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupPayload {
    pub token: Option<String>,
    pub user: Option<SignupUser>,
    pub errors: Option<Vec<ServerFieldError>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupData {
    pub signup: SignupPayload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphql::document::{Document, OperationKind};
    use serde_json::json;

    #[test]
    fn test_documents_parse() {
        assert_eq!(Document::parse(GET_AVAILABLE_BOOKS).unwrap().kind(), OperationKind::Query);
        assert_eq!(Document::parse(GET_USER_CHECKOUTS).unwrap().kind(), OperationKind::Query);
        let signup = Document::parse(SIGNUP_MUTATION).unwrap();
        assert_eq!(signup.kind(), OperationKind::Mutation);
        assert_eq!(signup.operation_name(), Some("Signup"));
    }

    #[test]
    fn test_checkout_decoding() {
        let data: UserCheckoutsData = serde_json::from_value(json!({
            "getUserCheckouts": [{
                "__typename": "Checkout",
                "id": 3,
                "total_price": 120.5,
                "status": "open",
                "return_date": "2026-11-02T00:00:00Z",
                "orders": {"id": "o1", "books": {"id": 7, "title": "Fikir Eske Mekabir", "cover_url": null, "price": 60}}
            }, {
                "id": 4, "total_price": null, "status": "lost", "return_date": "1767225600000", "orders": null
            }]
        }))
        .unwrap();

        let open = &data.get_user_checkouts[0];
        assert!(open.is_open());
        assert_eq!(open.book().unwrap().title.as_deref(), Some("Fikir Eske Mekabir"));
        assert_eq!(open.return_date().unwrap().to_rfc3339(), "2026-11-02T00:00:00+00:00");
        assert_eq!(open.id.to_string(), "3");

        let other = &data.get_user_checkouts[1];
        assert_eq!(other.status, CheckoutStatus::Other("lost".into()));
        assert_eq!(other.return_date().unwrap().timestamp_millis(), 1_767_225_600_000);
        assert!(other.book().is_none());
    }

    #[test]
    fn test_signup_payload_with_errors() {
        let data: SignupData = serde_json::from_value(json!({
            "signup": {"token": null, "user": null, "errors": [{"path": "email", "message": "taken"}]}
        }))
        .unwrap();
        assert_eq!(
            data.signup.errors,
            Some(vec![ServerFieldError { path: "email".into(), message: "taken".into() }])
        );
    }
}
