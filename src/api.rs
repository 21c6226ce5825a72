use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::media::{ImageUploader, UploadFile};
use crate::model::{ContainerRef, ElementBody, ElementRecord, SectionRecord};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("portal error {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to reach portal: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

fn url_error(err: impl fmt::Display) -> ApiError {
    ApiError::Url(err.to_string())
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

/// Element persistence operations the save cycle depends on.
#[async_trait]
pub trait PortalService: Send + Sync {
    async fn list_elements(&self, container: ContainerRef) -> Result<Vec<ElementRecord>, ApiError>;

    /// Returns the server-assigned id.
    async fn create_element(&self, body: &ElementBody) -> Result<i64, ApiError>;

    async fn update_element(&self, id: i64, body: &ElementBody) -> Result<(), ApiError>;

    async fn delete_element(&self, id: i64) -> Result<(), ApiError>;
}

#[derive(Clone)]
pub struct PortalClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl fmt::Debug for PortalClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// List endpoints answer either a bare array or a paginated envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Page { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> ListResponse<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Page { results } => results,
            ListResponse::Plain(items) => items,
        }
    }
}

#[derive(Deserialize)]
struct CreatedResponse {
    id: i64,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

impl PortalClient {
    pub fn new(base_url: Url, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent("portal-blocks/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    /// Base URL and timeout from config; the token comes from the session,
    /// which may have been cleared.
    pub fn from_config(cfg: &Config, token: Option<String>) -> Result<Self, ApiError> {
        let base_url = Url::parse(&cfg.api.base_url).map_err(url_error)?;
        Self::new(base_url, token, cfg.request_timeout())
    }

    /// Build a request against `path` (relative to the API base) with auth.
    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&ElementBody>,
    ) -> Result<reqwest::Request, ApiError> {
        let endpoint = self.base_url.join(path).map_err(url_error)?;
        let mut builder = self
            .http
            .request(method, endpoint)
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Token {}", token));
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.build()?)
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, ApiError> {
        let method = request.method().clone();
        let url = request.url().to_string();
        debug!(%method, %url, "sending portal request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(url));
        }
        if status == StatusCode::UNAUTHORIZED {
            warn!(%url, "portal rejected credentials");
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%method, %url, %status, %body, "portal error");
            return Err(ApiError::Status { status, body });
        }
        Ok(res)
    }

    async fn json<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T, ApiError> {
        let res = self.execute(request).await?;
        let text = res.text().await?;
        serde_json::from_str(&text).map_err(|err| ApiError::Decode(err.to_string()))
    }

    fn elements_path(container: ContainerRef) -> String {
        format!("elements/?{}={}", container.key(), container.id())
    }

    /// Sections of a course with their elements, in stored order.
    #[instrument(skip(self))]
    pub async fn list_sections(&self, course_id: i64) -> Result<Vec<SectionRecord>, ApiError> {
        let request = self.build_request(Method::GET, &format!("sections/?course={course_id}"), None)?;
        let mut sections = self.json::<ListResponse<SectionRecord>>(request).await?.into_vec();
        sections.sort_by_key(|s| s.order);
        Ok(sections)
    }

    fn upload_path(container: Option<ContainerRef>) -> &'static str {
        match container {
            Some(ContainerRef::News(_)) => "news/upload_image/",
            _ => "elements/upload_image/",
        }
    }
}

#[async_trait]
impl PortalService for PortalClient {
    #[instrument(skip(self))]
    async fn list_elements(&self, container: ContainerRef) -> Result<Vec<ElementRecord>, ApiError> {
        let request = self.build_request(Method::GET, &Self::elements_path(container), None)?;
        let mut elements = self.json::<ListResponse<ElementRecord>>(request).await?.into_vec();
        elements.sort_by_key(|e| e.order);
        info!(%container, count = elements.len(), "loaded elements");
        Ok(elements)
    }

    #[instrument(skip_all, fields(order = body.order))]
    async fn create_element(&self, body: &ElementBody) -> Result<i64, ApiError> {
        let request = self.build_request(Method::POST, "elements/", Some(body))?;
        let created: CreatedResponse = self.json(request).await?;
        info!(id = created.id, "created element");
        Ok(created.id)
    }

    #[instrument(skip(self, body), fields(order = body.order))]
    async fn update_element(&self, id: i64, body: &ElementBody) -> Result<(), ApiError> {
        let request = self.build_request(Method::PATCH, &format!("elements/{id}/"), Some(body))?;
        self.execute(request).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_element(&self, id: i64) -> Result<(), ApiError> {
        let request = self.build_request(Method::DELETE, &format!("elements/{id}/"), None)?;
        self.execute(request).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageUploader for PortalClient {
    #[instrument(skip_all, fields(file = %file.name))]
    async fn upload_image(&self, file: &UploadFile, container: Option<ContainerRef>) -> Result<String, ApiError> {
        let part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)?;
        let mut form = reqwest::multipart::Form::new().part("image", part);
        if let Some(ContainerRef::Section(id)) = container {
            form = form.text("section_id", id.to_string());
        }

        let endpoint = self.base_url.join(Self::upload_path(container)).map_err(url_error)?;
        let mut builder = self.http.post(endpoint).multipart(form);
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Token {}", token));
        }
        let uploaded: UploadResponse = self.json(builder.build()?).await?;
        info!(url = %uploaded.url, "uploaded image");
        Ok(uploaded.url)
    }
}
