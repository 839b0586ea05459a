use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use novus_core::tool::{Error as ToolError, Tool, ToolResult};
use reqwest::Client;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{BackendError, fetch_text, parse_json, to_json_text};

const GMAIL_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const DEFAULT_COUNT: usize = 10;

/// Header fields of a received message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EmailSummary {
    /// Gmail message id.
    pub id: String,
    /// `From` header.
    pub from: String,
    /// `Subject` header.
    pub subject: String,
    /// `Date` header.
    pub date: String,
    /// Start of the body.
    pub snippet: String,
}

/// A plain text message to send.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct OutgoingEmail {
    /// Recipient address.
    #[schemars(description = "The email address of the recipient.")]
    pub to: String,
    /// Subject line.
    #[schemars(description = "The subject of the email.")]
    pub subject: String,
    /// Plain text body.
    #[schemars(description = "The plain text body of the email.")]
    pub body: String,
}

impl OutgoingEmail {
    /// Renders the message in RFC 2822 form.
    ///
    /// Header values must not contain line breaks, otherwise a caller could
    /// smuggle in extra headers.
    pub fn to_rfc2822(&self) -> Result<String, ToolError> {
        for (field, value) in [("to", &self.to), ("subject", &self.subject)] {
            if value.contains(['\r', '\n']) {
                return Err(ToolError::invalid_argument()
                    .with_reason(format!("`{field}` must be a single line")));
            }
        }
        if self.to.trim().is_empty() {
            return Err(ToolError::invalid_argument()
                .with_reason("`to` must not be empty"));
        }
        Ok(format!(
            "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
            self.to.trim(),
            self.subject,
            self.body
        ))
    }

    fn encode(&self) -> Result<String, ToolError> {
        Ok(URL_SAFE.encode(self.to_rfc2822()?))
    }
}

/// A mailbox the assistant can read and send from.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Returns the `count` newest messages of the inbox, newest first.
    async fn latest(&self, count: usize)
    -> Result<Vec<EmailSummary>, BackendError>;

    /// Sends an already encoded message and returns its id.
    async fn send(&self, raw: String) -> Result<String, BackendError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
struct Message {
    id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl From<Message> for EmailSummary {
    fn from(message: Message) -> Self {
        let mut summary = EmailSummary {
            id: message.id,
            snippet: message.snippet,
            ..Default::default()
        };
        let headers = message.payload.map(|p| p.headers).unwrap_or_default();
        for header in headers {
            let slot = match header.name.to_ascii_lowercase().as_str() {
                "from" => &mut summary.from,
                "subject" => &mut summary.subject,
                "date" => &mut summary.date,
                _ => continue,
            };
            *slot = header.value;
        }
        summary
    }
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

/// [`Mailbox`] backed by the Gmail REST API.
pub struct Gmail {
    client: Client,
    base_url: String,
    access_token: String,
}

impl Gmail {
    /// Creates the backend with a shared HTTP client and an OAuth access
    /// token carrying the read and send scopes.
    #[inline]
    pub fn new(client: Client, access_token: String) -> Self {
        Self {
            client,
            base_url: GMAIL_URL.to_owned(),
            access_token,
        }
    }
}

#[async_trait]
impl Mailbox for Gmail {
    async fn latest(
        &self,
        count: usize,
    ) -> Result<Vec<EmailSummary>, BackendError> {
        let req = self
            .client
            .get(format!("{}/messages", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&[("maxResults", count.to_string())]);
        let list: MessageList = parse_json(&fetch_text(req).await?)?;

        let mut summaries = Vec::with_capacity(list.messages.len());
        for message in list.messages {
            let req = self
                .client
                .get(format!("{}/messages/{}", self.base_url, message.id))
                .bearer_auth(&self.access_token)
                .query(&[
                    ("format", "metadata"),
                    ("metadataHeaders", "From"),
                    ("metadataHeaders", "Subject"),
                    ("metadataHeaders", "Date"),
                ]);
            let message: Message = parse_json(&fetch_text(req).await?)?;
            summaries.push(message.into());
        }
        Ok(summaries)
    }

    async fn send(&self, raw: String) -> Result<String, BackendError> {
        let req = self
            .client
            .post(format!("{}/messages/send", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&json!({ "raw": raw }));
        let sent: SentMessage = parse_json(&fetch_text(req).await?)?;
        Ok(sent.id)
    }
}

fn default_count() -> usize {
    DEFAULT_COUNT
}

/// Arguments of `get_latest_emails`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct LatestEmailsInput {
    /// How many messages to return.
    #[schemars(description = "The number of latest emails to return, default 10.")]
    #[serde(default = "default_count")]
    pub count: usize,
}

/// Lists the newest messages of the inbox.
pub struct LatestEmailsTool {
    mailbox: Arc<dyn Mailbox>,
    parameter_schema: Value,
}

impl LatestEmailsTool {
    /// Creates the tool on top of a mailbox.
    #[inline]
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self {
            mailbox,
            parameter_schema: schema_for!(LatestEmailsInput).to_value(),
        }
    }
}

impl Tool for LatestEmailsTool {
    type Input = LatestEmailsInput;

    fn name(&self) -> &str {
        "get_latest_emails"
    }

    fn description(&self) -> &str {
        "Use this function to get the latest emails from the user's inbox."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: LatestEmailsInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let mailbox = Arc::clone(&self.mailbox);
        async move {
            let emails = mailbox.latest(input.count).await?;
            if emails.is_empty() {
                return Ok("The inbox is empty.".to_owned());
            }
            to_json_text(&emails)
        }
    }
}

/// Sends a plain text message.
pub struct SendEmailTool {
    mailbox: Arc<dyn Mailbox>,
    parameter_schema: Value,
}

impl SendEmailTool {
    /// Creates the tool on top of a mailbox.
    #[inline]
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self {
            mailbox,
            parameter_schema: schema_for!(OutgoingEmail).to_value(),
        }
    }
}

impl Tool for SendEmailTool {
    type Input = OutgoingEmail;

    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Use this function to send an email on behalf of the user."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: OutgoingEmail,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let mailbox = Arc::clone(&self.mailbox);
        async move {
            let raw = input.encode()?;
            let id = mailbox.send(raw).await?;
            info!("email sent, message id: {id}");
            Ok(format!("Email sent successfully. Message id: {id}"))
        }
    }
}
