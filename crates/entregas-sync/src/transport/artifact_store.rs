// Archivo: artifact_store.rs
// Propósito: subir artefactos (PDF) a un almacén tipo Drive con una subida
// multipart/related: metadata JSON + binario.
use super::{http_client, read_success_body, transport_error};
use async_trait::async_trait;
use entregas_core::{ArtifactRef, ArtifactStore, ArtifactUpload, Result, SyncConfig, SyncError};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
    #[serde(rename = "webViewLink")]
    web_view_link: Option<String>,
}

pub struct HttpArtifactStore {
    client: reqwest::Client,
    upload_url: String,
    token: Option<String>,
    default_folder: Option<String>,
}

impl HttpArtifactStore {
    /// `upload_url` debe incluir los parámetros de la API, por ejemplo
    /// `...?uploadType=multipart&fields=id,webViewLink`.
    pub fn new(upload_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self { client: http_client(timeout)?,
                  upload_url: upload_url.into(),
                  token,
                  default_folder: None })
    }

    pub fn with_default_folder(mut self, folder: Option<String>) -> Self {
        self.default_folder = folder;
        self
    }

    /// Requiere `ENTREGAS_ARTIFACT_UPLOAD_URL`.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let url = config.artifact_upload_url
                        .clone()
                        .ok_or_else(|| SyncError::Config("ENTREGAS_ARTIFACT_UPLOAD_URL no configurada".into()))?;
        Ok(Self::new(url, config.artifact_token.clone(), config.http_timeout)?.with_default_folder(config.artifact_folder
                                                                                                         .clone()))
    }

    fn multipart_body(&self, artifact: &ArtifactUpload, boundary: &str) -> Result<Vec<u8>> {
        let mut metadata = json!({ "name": artifact.filename, "mimeType": artifact.content_type });
        if let Some(folder) = artifact.folder.as_ref().or(self.default_folder.as_ref()) {
            metadata["parents"] = json!([folder]);
        }
        let metadata = serde_json::to_string(&metadata)?;

        let mut body = Vec::with_capacity(artifact.content.len() + metadata.len() + 256);
        body.extend_from_slice(format!("--{}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{}\r\n",
                                       boundary, metadata).as_bytes());
        body.extend_from_slice(format!("--{}\r\nContent-Type: {}\r\n\r\n", boundary, artifact.content_type).as_bytes());
        body.extend_from_slice(&artifact.content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        Ok(body)
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn upload(&self, artifact: &ArtifactUpload) -> Result<ArtifactRef> {
        let boundary = format!("entregas-{}", Uuid::new_v4().simple());
        let body = self.multipart_body(artifact, &boundary)?;
        let mut request = self.client
                              .post(&self.upload_url)
                              .header(CONTENT_TYPE, format!("multipart/related; boundary={}", boundary))
                              .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(transport_error)?;
        let text = read_success_body(response).await?;
        let parsed: UploadResponse = serde_json::from_str(&text).map_err(|e| {
                                         SyncError::Malformed(format!("respuesta de subida inválida: {}", e))
                                     })?;
        let link = parsed.web_view_link
                         .filter(|l| !l.trim().is_empty())
                         .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", parsed.id));
        log::debug!("artefacto {} subido como {}", artifact.filename, parsed.id);
        Ok(ArtifactRef { id: parsed.id, link })
    }
}
