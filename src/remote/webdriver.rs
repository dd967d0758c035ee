//! Minimal W3C WebDriver client over HTTP/JSON.
//!
//! Only the commands the Zendesk flows need are implemented. Every response
//! is `{"value": ...}`; failures carry `{"value": {"error", "message"}}` and
//! are mapped through [`RemoteError::from_webdriver`].

use std::time::Duration;

use base64::Engine;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use url::Url;

use super::error::RemoteError;

/// W3C web element identifier key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// WebDriver key codes.
pub mod keys {
    pub const NULL: char = '\u{E000}';
    pub const BACKSPACE: char = '\u{E003}';
    pub const ENTER: char = '\u{E007}';
    pub const CONTROL: char = '\u{E009}';
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementId(pub String);

#[derive(Debug, Clone, Copy)]
pub enum Locator<'a> {
    Css(&'a str),
    XPath(&'a str),
}

impl Locator<'_> {
    fn to_json(self) -> Value {
        match self {
            Locator::Css(s) => json!({"using": "css selector", "value": s}),
            Locator::XPath(s) => json!({"using": "xpath", "value": s}),
        }
    }
}

impl std::fmt::Display for Locator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={}", s),
            Locator::XPath(s) => write!(f, "xpath={}", s),
        }
    }
}

pub struct WebDriverClient {
    http: Client,
    base: Url,
    session_id: String,
}

impl std::fmt::Debug for WebDriverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDriverClient")
            .field("base", &self.base.as_str())
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Issue one WebDriver command and unwrap its `value`.
async fn send(
    http: &Client,
    method: Method,
    url: Url,
    body: Option<Value>,
) -> Result<Value, RemoteError> {
    let mut request = http.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let status = response.status();
    let mut payload: Value = response.json().await?;
    let value = payload
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(RemoteError::from_webdriver(error, message));
    }
    if !status.is_success() {
        return Err(RemoteError::Protocol(format!("HTTP {} without error payload", status)));
    }
    Ok(value)
}

impl WebDriverClient {
    /// Create a new browser session on the driver at `base`.
    pub async fn connect(
        base: Url,
        capabilities: Value,
        request_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        let url = base
            .join("session")
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        let value = send(
            &http,
            Method::POST,
            url,
            Some(json!({"capabilities": {"alwaysMatch": capabilities}})),
        )
        .await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Protocol("new session response has no sessionId".into()))?
            .to_string();
        tracing::debug!(session_id = %session_id, "WebDriver session created");
        Ok(Self {
            http,
            base,
            session_id,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        let suffix = if path.is_empty() {
            format!("session/{}", self.session_id)
        } else {
            format!("session/{}/{}", self.session_id, path)
        };
        self.base
            .join(&suffix)
            .map_err(|e| RemoteError::Protocol(e.to_string()))
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, RemoteError> {
        send(&self.http, method, self.endpoint(path)?, body).await
    }

    pub fn element_ref(element: &ElementId) -> Value {
        json!({ ELEMENT_KEY: element.0 })
    }

    fn parse_elements(value: Value) -> Result<Vec<ElementId>, RemoteError> {
        let Value::Array(items) = value else {
            return Err(RemoteError::Protocol("expected an element array".into()));
        };
        items
            .iter()
            .map(|item| {
                item.get(ELEMENT_KEY)
                    .and_then(Value::as_str)
                    .map(|id| ElementId(id.to_string()))
                    .ok_or_else(|| RemoteError::Protocol("element without identifier".into()))
            })
            .collect()
    }

    pub async fn set_timeouts(&self, script: Duration, page_load: Duration) -> Result<(), RemoteError> {
        self.command(
            Method::POST,
            "timeouts",
            Some(json!({
                "script": script.as_millis() as u64,
                "pageLoad": page_load.as_millis() as u64,
                "implicit": 0,
            })),
        )
        .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &Url) -> Result<(), RemoteError> {
        self.command(Method::POST, "url", Some(json!({"url": url.as_str()})))
            .await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String, RemoteError> {
        let value = self.command(Method::GET, "url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn title(&self) -> Result<String, RemoteError> {
        let value = self.command(Method::GET, "title", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Run a synchronous script; elements in `args` go through [`Self::element_ref`].
    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({"script": script, "args": args})),
        )
        .await
    }

    pub async fn find_all(&self, locator: Locator<'_>) -> Result<Vec<ElementId>, RemoteError> {
        let value = self
            .command(Method::POST, "elements", Some(locator.to_json()))
            .await?;
        Self::parse_elements(value)
    }

    pub async fn find_all_from(
        &self,
        parent: &ElementId,
        locator: Locator<'_>,
    ) -> Result<Vec<ElementId>, RemoteError> {
        let value = self
            .command(
                Method::POST,
                &format!("element/{}/elements", parent.0),
                Some(locator.to_json()),
            )
            .await?;
        Self::parse_elements(value)
    }

    pub async fn text(&self, element: &ElementId) -> Result<String, RemoteError> {
        let value = self
            .command(Method::GET, &format!("element/{}/text", element.0), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn attribute(&self, element: &ElementId, name: &str) -> Result<Option<String>, RemoteError> {
        let value = self
            .command(
                Method::GET,
                &format!("element/{}/attribute/{}", element.0, name),
                None,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    pub async fn is_displayed(&self, element: &ElementId) -> Result<bool, RemoteError> {
        let value = self
            .command(Method::GET, &format!("element/{}/displayed", element.0), None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn click(&self, element: &ElementId) -> Result<(), RemoteError> {
        self.command(
            Method::POST,
            &format!("element/{}/click", element.0),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    pub async fn clear(&self, element: &ElementId) -> Result<(), RemoteError> {
        self.command(
            Method::POST,
            &format!("element/{}/clear", element.0),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    pub async fn send_keys(&self, element: &ElementId, text: &str) -> Result<(), RemoteError> {
        self.command(
            Method::POST,
            &format!("element/{}/value", element.0),
            Some(json!({"text": text})),
        )
        .await?;
        Ok(())
    }

    pub async fn window_handles(&self) -> Result<Vec<String>, RemoteError> {
        let value = self.command(Method::GET, "window/handles", None).await?;
        Ok(value
            .as_array()
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(|h| h.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Open a new tab and return its handle (does not switch to it).
    pub async fn new_tab(&self) -> Result<String, RemoteError> {
        let value = self
            .command(Method::POST, "window/new", Some(json!({"type": "tab"})))
            .await?;
        value
            .get("handle")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Protocol("new window response has no handle".into()))
    }

    pub async fn switch_to_window(&self, handle: &str) -> Result<(), RemoteError> {
        self.command(Method::POST, "window", Some(json!({"handle": handle})))
            .await?;
        Ok(())
    }

    /// Close the current window; returns the remaining handles.
    pub async fn close_window(&self) -> Result<Vec<String>, RemoteError> {
        let value = self.command(Method::DELETE, "window", None).await?;
        Ok(value
            .as_array()
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(|h| h.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Print the current page to PDF (A4 portrait, with backgrounds).
    pub async fn print_pdf(&self) -> Result<Vec<u8>, RemoteError> {
        let value = self
            .command(
                Method::POST,
                "print",
                Some(json!({
                    "orientation": "portrait",
                    "background": true,
                    "scale": 1.0,
                    "shrinkToFit": true,
                    "page": {"width": 21.0, "height": 29.7},
                })),
            )
            .await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| RemoteError::Protocol("print response is not a string".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| RemoteError::Protocol(format!("print response is not base64: {}", e)))
    }

    /// End the browser session.
    pub async fn quit(&self) -> Result<(), RemoteError> {
        self.command(Method::DELETE, "", None).await?;
        Ok(())
    }
}
