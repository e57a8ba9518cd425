//! Upload-capable HTTP transport
//!
//! Plain operations are POSTed as JSON. Operations carrying files follow the
//! GraphQL multipart request convention: an `operations` part with the file
//! variables nulled out, a `map` part pointing each file part at its variable
//! path, then one part per file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use url::Url;

use super::error::NetworkError;
use super::link::{GraphQLResponse, Link, Operation};

/// A file sent with an operation
#[derive(Clone)]
pub struct Upload {
    /// Dotted path of the variable the file fills, e.g. `variables.cover`
    pub variable_path: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("variable_path", &self.variable_path)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Upload {
    /// Upload for the variable `variable` (a name like `cover`, or a dotted
    /// path below `variables` like `input.cover`)
    pub fn new(variable: &str, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .to_string();
        Self {
            variable_path: format!("variables.{variable}"),
            file_name,
            content_type,
            bytes,
        }
    }

    pub async fn from_path(variable: &str, path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(variable, file_name, bytes))
    }
}

/// `{"0": ["variables.cover"], ...}`
pub fn multipart_map(uploads: &[Upload]) -> JsonValue {
    let map: serde_json::Map<String, JsonValue> = uploads
        .iter()
        .enumerate()
        .map(|(i, upload)| (i.to_string(), JsonValue::from(vec![upload.variable_path.clone()])))
        .collect();
    JsonValue::Object(map)
}

/// Operation body with every upload's variable set to `null`
pub fn multipart_operations(operation: &Operation) -> Result<JsonValue, NetworkError> {
    let mut body = operation.body();
    for upload in &operation.uploads {
        let slot = upload
            .variable_path
            .split('.')
            .try_fold(&mut body, |value, segment| match value {
                JsonValue::Object(map) => Some(map.entry(segment.to_string()).or_insert(JsonValue::Null)),
                JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
                _ => None,
            })
            .ok_or_else(|| NetworkError::Upload(format!("bad variable path {}", upload.variable_path)))?;
        *slot = JsonValue::Null;
    }
    Ok(body)
}

/// Terminating link that sends operations over HTTP
pub struct UploadLink {
    client: Client,
    uri: Url,
}

impl UploadLink {
    pub fn new(uri: Url, timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, uri })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    fn multipart_form(operation: &Operation) -> Result<Form, NetworkError> {
        let operations = multipart_operations(operation)?;
        let map = multipart_map(&operation.uploads);

        let mut form = Form::new()
            .text("operations", operations.to_string())
            .text("map", map.to_string());
        for (i, upload) in operation.uploads.iter().enumerate() {
            let part = Part::bytes(upload.bytes.clone())
                .file_name(upload.file_name.clone())
                .mime_str(&upload.content_type)
                .map_err(|e| NetworkError::Upload(e.to_string()))?;
            form = form.part(i.to_string(), part);
        }
        Ok(form)
    }
}

#[async_trait]
impl Link for UploadLink {
    async fn request(&self, operation: Operation) -> Result<GraphQLResponse, NetworkError> {
        let operation_name = operation.operation_name().unwrap_or("anonymous").to_string();
        debug!(
            operation = %operation_name,
            uploads = operation.uploads.len(),
            uri = %self.uri,
            "Sending GraphQL operation"
        );

        let request = self
            .client
            .post(self.uri.clone())
            .headers(operation.headers.clone());
        let request = if operation.uploads.is_empty() {
            request.json(&operation.body())
        } else {
            request.multipart(Self::multipart_form(&operation)?)
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(operation = %operation_name, status = status.as_u16(), "GraphQL request failed");
            return Err(NetworkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(NetworkError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphql::document::{Document, JsonMap};
    use serde_json::json;

    fn upload_operation(uploads: Vec<Upload>) -> Operation {
        let mut variables = JsonMap::new();
        variables.insert("title".into(), json!("Dune"));
        variables.insert("input".into(), json!({"cover": "placeholder"}));
        Operation::new(
            Document::parse("mutation($title: String, $cover: Upload, $input: BookInput) { addBook(title: $title, cover: $cover, input: $input) { id } }")
                .unwrap(),
            variables,
        )
        .with_uploads(uploads)
    }

    #[test]
    fn test_content_type_guessed_from_name() {
        let upload = Upload::new("cover", "cover.png", vec![1, 2, 3]);
        assert_eq!(upload.content_type, "image/png");
        assert_eq!(upload.variable_path, "variables.cover");

        let unknown = Upload::new("cover", "blob", vec![]);
        assert_eq!(unknown.content_type, "application/octet-stream");
    }

    #[test]
    fn test_multipart_map_and_operations() {
        let op = upload_operation(vec![
            Upload::new("cover", "cover.jpg", vec![0]),
            Upload::new("input.cover", "other.jpg", vec![1]),
        ]);

        assert_eq!(
            multipart_map(&op.uploads),
            json!({"0": ["variables.cover"], "1": ["variables.input.cover"]})
        );

        let operations = multipart_operations(&op).unwrap();
        assert_eq!(operations["variables"]["cover"], JsonValue::Null);
        assert_eq!(operations["variables"]["input"]["cover"], JsonValue::Null);
        assert_eq!(operations["variables"]["title"], json!("Dune"));
    }

    #[test]
    fn test_bad_variable_path_rejected() {
        let op = upload_operation(vec![Upload::new("title.deeper", "x.jpg", vec![])]);
        assert!(matches!(multipart_operations(&op), Err(NetworkError::Upload(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_network_error() {
        let link = UploadLink::new(
            Url::parse("http://127.0.0.1:9/").unwrap(),
            Duration::from_secs(2),
        )
        .unwrap();
        let result = link.request(upload_operation(Vec::new())).await;
        assert!(matches!(result, Err(NetworkError::Request(_))));
    }

    /// One-shot HTTP server answering with `reply`; yields the request
    /// head (lowercased) and body
    async fn serve_once(reply: JsonValue) -> (Url, tokio::task::JoinHandle<(String, String)>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];

            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
            let length: usize = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse().ok())
                .expect("request has a content-length");
            while buf.len() - head_end < length {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before body");
                buf.extend_from_slice(&chunk[..n]);
            }
            let body = String::from_utf8_lossy(&buf[head_end..head_end + length]).into_owned();

            let payload = reply.to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                payload.len(),
                payload
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            (head, body)
        });
        (uri, server)
    }

    /// Contents of the multipart part named `name`
    fn part<'a>(body: &'a str, name: &str) -> &'a str {
        let marker = format!("name=\"{name}\"");
        let start = body.find(&marker).unwrap_or_else(|| panic!("no part {name}"));
        let content = start + body[start..].find("\r\n\r\n").unwrap() + 4;
        let end = content + body[content..].find("\r\n--").unwrap();
        &body[content..end]
    }

    #[tokio::test]
    async fn test_plain_operation_is_posted_as_json() {
        let (uri, server) = serve_once(json!({"data": {"getAvailableBooks": []}})).await;
        let link = UploadLink::new(uri, Duration::from_secs(5)).unwrap();

        let mut variables = JsonMap::new();
        variables.insert("searchString".into(), json!("dune"));
        let operation = Operation::new(
            Document::parse("query GetAvailableBooks($searchString: String) { getAvailableBooks(searchString: $searchString) { id } }")
                .unwrap(),
            variables,
        );
        let response = link.request(operation).await.unwrap();
        assert_eq!(response.data, Some(json!({"getAvailableBooks": []})));
        assert!(!response.has_errors());

        let (head, body) = server.await.unwrap();
        assert!(head.starts_with("post / "));
        assert!(head.contains("content-type: application/json"));
        let body: JsonValue = serde_json::from_str(&body).unwrap();
        assert_eq!(body["operationName"], json!("GetAvailableBooks"));
        assert_eq!(body["variables"], json!({"searchString": "dune"}));
    }

    #[tokio::test]
    async fn test_upload_mutation_is_sent_as_multipart() {
        use crate::graphql::cache::InMemoryCache;
        use crate::graphql::client::GraphQLClient;
        use crate::graphql::link::AuthLink;
        use crate::services::credentials::{CredentialStore, Token};
        use std::sync::Arc;

        let (uri, server) = serve_once(json!({
            "data": {"updateCover": {"__typename": "Book", "id": "1", "cover_url": "/covers/1.png"}}
        }))
        .await;
        let credentials = CredentialStore::in_memory("@test/token");
        credentials.set(&Token::new("X")).await.unwrap();
        let transport = UploadLink::new(uri, Duration::from_secs(5)).unwrap();
        let client = GraphQLClient::new(
            Arc::new(AuthLink::new(credentials, transport)),
            Arc::new(InMemoryCache::default()),
        );

        let document = Document::parse(
            "mutation UpdateCover($id: ID!, $cover: Upload!) { updateCover(id: $id, cover: $cover) { id cover_url } }",
        )
        .unwrap();
        let mut variables = JsonMap::new();
        variables.insert("id".into(), json!("1"));
        variables.insert("cover".into(), JsonValue::Null);
        let data = client
            .mutate_with_uploads(
                &document,
                variables,
                vec![Upload::new("cover", "cover.png", b"PNGBYTES".to_vec())],
            )
            .await
            .unwrap();

        assert_eq!(data["updateCover"]["cover_url"], json!("/covers/1.png"));
        assert!(client.cache().read_entity("Book:1").is_some());

        let (head, body) = server.await.unwrap();
        assert!(head.contains("authorization: bearer x\r\n"));
        assert!(head.contains("content-type: multipart/form-data; boundary="));

        let operations: JsonValue = serde_json::from_str(part(&body, "operations")).unwrap();
        assert_eq!(operations["operationName"], json!("UpdateCover"));
        assert_eq!(operations["variables"], json!({"id": "1", "cover": null}));

        let map: JsonValue = serde_json::from_str(part(&body, "map")).unwrap();
        assert_eq!(map, json!({"0": ["variables.cover"]}));

        assert_eq!(part(&body, "0"), "PNGBYTES");
        assert!(body.contains("filename=\"cover.png\""));
        assert!(body.to_lowercase().contains("content-type: image/png"));
    }
}
