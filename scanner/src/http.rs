//! The HTTP client shared by API source collectors.

use std::sync::{Arc, Mutex, PoisonError};

use derivative::Derivative;
use reqwest::{header, tls, Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::{collect::ApiTarget, error::truncate, ApiError};

#[derive(Clone)]
enum Auth {
    None,
    Basic(String, Option<String>),
    Bearer(String),
}

/// An authenticated client rooted at an API source.
///
/// Session cookies set by the server are replayed on later requests.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct HttpClient {
    #[derivative(Debug = "ignore")]
    client: Client,
    base: String,
    accept_invalid_certs: bool,
    #[derivative(Debug = "ignore")]
    auth: Auth,
    #[derivative(Debug = "ignore")]
    cookie: Arc<Mutex<Option<String>>>,
}

impl HttpClient {
    /// Build a client for `target`, authenticating with its credential.
    ///
    /// A bearer token wins over a username and password.
    pub fn new(target: &ApiTarget) -> Result<Self, ApiError> {
        let scheme = if target.options.disable_ssl().unwrap_or(false) {
            "http"
        } else {
            "https"
        };
        let base = format!("{scheme}://{}:{}", target.host, target.port);

        let accept_invalid_certs = !target.options.ssl_cert_verify().unwrap_or(true);
        let mut builder = Client::builder()
            .timeout(target.timeout)
            .danger_accept_invalid_certs(accept_invalid_certs);
        if let Some(version) = target.options.ssl_protocol().as_deref().and_then(tls_version) {
            builder = builder.min_tls_version(version).max_tls_version(version);
        }
        let client = builder.build().map_err(|err| ApiError::Unreachable {
            url: base.clone(),
            reason: err.to_string(),
        })?;

        let credential = &target.credential;
        let auth = match (credential.auth_token(), credential.username()) {
            (Some(token), _) => Auth::Bearer(token.clone()),
            (None, Some(user)) => Auth::Basic(user.clone(), credential.password().clone()),
            (None, None) => Auth::None,
        };

        Ok(Self {
            client,
            base,
            accept_invalid_certs,
            auth,
            cookie: Arc::new(Mutex::new(None)),
        })
    }

    /// Replace the authentication with a bearer token.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.auth = Auth::Bearer(token.into());
        self
    }

    /// The scheme, host, and port requests are made against.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The absolute URL of `path`; absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_owned()
        } else {
            format!("{}{path}", self.base)
        }
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.auth {
            Auth::None => request,
            Auth::Basic(user, password) => request.basic_auth(user, password.as_ref()),
            Auth::Bearer(token) => request.bearer_auth(token),
        };
        let cookie = self.cookie.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match cookie {
            Some(cookie) => request.header(header::COOKIE, cookie),
            None => request,
        }
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, ApiError> {
        debug!(%url, "request");
        let response = self
            .prepare(request)
            .send()
            .await
            .map_err(|err| ApiError::Unreachable {
                url: url.to_owned(),
                reason: err.to_string(),
            })?;

        if let Some(cookie) = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
        {
            *self.cookie.lock().unwrap_or_else(PoisonError::into_inner) = Some(cookie.to_owned());
        }
        Ok(response)
    }

    async fn body(url: &str, response: Response) -> Result<String, ApiError> {
        let status = response.status();
        let body = response.text().await.map_err(|err| ApiError::Unreachable {
            url: url.to_owned(),
            reason: err.to_string(),
        })?;
        check(url, status, &body)?;
        Ok(body)
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
        self.get_json_query(path, &[]).await
    }

    /// GET `path` with query parameters and decode the JSON body.
    pub async fn get_json_query(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = self.url(path);
        let response = self.send(&url, self.client.get(&url).query(query)).await?;
        let body = Self::body(&url, response).await?;
        serde_json::from_str(&body).map_err(|err| ApiError::protocol(&url, err, &body))
    }

    /// POST an XML document to `path` and return the response document.
    ///
    /// `action` is sent as the `SOAPAction` header when set.
    pub async fn post_xml(&self, path: &str, action: Option<&str>, body: String) -> Result<String, ApiError> {
        let url = self.url(path);
        let mut request = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(body);
        if let Some(action) = action {
            request = request.header("SOAPAction", action);
        }
        let response = self.send(&url, request).await?;
        Self::body(&url, response).await
    }

    /// GET `url` without following redirects and return the `Location` header.
    pub async fn location(&self, url: &str, extra: &[(&str, &str)]) -> Result<String, ApiError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(|err| ApiError::Unreachable {
                url: url.to_owned(),
                reason: err.to_string(),
            })?;
        let mut request = client.get(url);
        for (name, value) in extra {
            request = request.header(*name, *value);
        }
        let response = self.send(url, request).await?;
        let status = response.status();
        if !status.is_redirection() {
            let body = response.text().await.unwrap_or_default();
            check(url, status, &body)?;
            return Err(ApiError::protocol(url, "expected a redirect", &body));
        }
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| ApiError::protocol(url, "redirect without a location", ""))
    }
}

fn check(url: &str, status: StatusCode, body: &str) -> Result<(), ApiError> {
    if status.is_success() {
        return Ok(());
    }
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized {
            url: url.to_owned(),
            status: status.as_u16(),
        },
        StatusCode::NOT_FOUND => ApiError::NotFound { url: url.to_owned() },
        _ => ApiError::Status {
            url: url.to_owned(),
            status: status.as_u16(),
            body: truncate(body),
        },
    })
}

fn tls_version(protocol: &str) -> Option<tls::Version> {
    match protocol {
        "TLSv1" | "TLSv1_0" => Some(tls::Version::TLS_1_0),
        "TLSv1_1" => Some(tls::Version::TLS_1_1),
        "TLSv1_2" => Some(tls::Version::TLS_1_2),
        _ => None,
    }
}
