//! Signup form: fields, registration rules and the signup mutation

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use super::submission::{ActionOutcome, FormController, SubmitAction};
use super::validation::{FormField, FormValues, Rule, Schema};
use crate::graphql::document::Document;
use crate::graphql::operations::{SIGNUP_MUTATION, SignupData};
use crate::graphql::{ClientError, GraphQLClient};
use crate::services::credentials::Token;
use crate::services::session::{CurrentUser, Session};

pub const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignupField {
    Name,
    Email,
    Password,
    ConfirmPassword,
}

impl FormField for SignupField {
    const ALL: &'static [Self] = &[
        SignupField::Name,
        SignupField::Email,
        SignupField::Password,
        SignupField::ConfirmPassword,
    ];

    fn name(self) -> &'static str {
        match self {
            SignupField::Name => "name",
            SignupField::Email => "email",
            SignupField::Password => "password",
            SignupField::ConfirmPassword => "confirmPassword",
        }
    }
}

pub fn registration_schema() -> Schema<SignupField> {
    Schema::new()
        .rule(SignupField::Name, Rule::required("Name is required"))
        .rule(SignupField::Email, Rule::required("Email is required"))
        .rule(SignupField::Email, Rule::email("Invalid email"))
        .rule(SignupField::Password, Rule::required("Password is required"))
        .rule(
            SignupField::Password,
            Rule::min_length(
                MIN_PASSWORD_LENGTH,
                format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
            ),
        )
        .rule(
            SignupField::ConfirmPassword,
            Rule::required("Please confirm your password"),
        )
        .rule(
            SignupField::ConfirmPassword,
            Rule::matches(SignupField::Password, "Passwords must match"),
        )
}

/// Runs the signup mutation and signs the session in on success
pub struct SignupAction {
    client: GraphQLClient,
    session: Arc<Session>,
}

impl SignupAction {
    pub fn new(client: GraphQLClient, session: Arc<Session>) -> Self {
        Self { client, session }
    }

    async fn run(&self, values: &FormValues<SignupField>) -> Result<SignupData, ClientError> {
        let document = Document::parse(SIGNUP_MUTATION)?;
        let variables = json!({
            "name": values.get(SignupField::Name),
            "email": values.get(SignupField::Email),
            "password": values.get(SignupField::Password),
        });
        let variables = variables.as_object().cloned().unwrap_or_default();

        let data = self.client.mutate(&document, variables).await?;
        serde_json::from_value(data).map_err(ClientError::Data)
    }
}

#[async_trait]
impl SubmitAction<SignupField> for SignupAction {
    type Output = CurrentUser;

    async fn submit(&self, values: &FormValues<SignupField>) -> ActionOutcome<CurrentUser> {
        let payload = match self.run(values).await {
            Ok(data) => data.signup,
            Err(e) => return ActionOutcome::Failed(e.to_string()),
        };

        if let Some(errors) = payload.errors.filter(|e| !e.is_empty()) {
            return ActionOutcome::Rejected(errors);
        }

        let (Some(token), Some(user)) = (payload.token, payload.user) else {
            warn!("Signup response carried neither errors nor credentials");
            return ActionOutcome::Failed("Signup response did not include a token".to_string());
        };

        let user = CurrentUser::from(user);
        if let Err(e) = self.session.sign_in(&Token::new(token), user.clone()).await {
            return ActionOutcome::Failed(format!("Could not store credentials: {e}"));
        }
        info!(email = %user.email, "Account created");
        ActionOutcome::Accepted(user)
    }
}

pub type SignupForm = FormController<SignupField, SignupAction>;

pub fn signup_form(client: GraphQLClient, session: Arc<Session>) -> SignupForm {
    FormController::new(registration_schema(), SignupAction::new(client, session))
}
