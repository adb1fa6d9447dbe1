use crate::types::{plate_matches, CapturedImage, DraftRecord, PersistedRecord};
use crate::upload;
use bytes::Bytes;
use failure::Fail;
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::io;
use url::Url;

#[derive(Debug, Fail)]
pub enum StoreError {
    #[fail(display = "Invalid backend URL: {}", _0)]
    Url(#[fail(cause)] url::ParseError),
    #[fail(display = "Backend unreachable: {}", _0)]
    Network(#[fail(cause)] reqwest::Error),
    #[fail(display = "Backend returned {}: {}", status, body)]
    Status { status: u16, body: String },
    #[fail(display = "Unexpected backend response: {}", _0)]
    Decode(#[fail(cause)] serde_json::Error),
    #[fail(display = "Could not read image: {}", _0)]
    Image(#[fail(cause)] io::Error),
}

impl From<url::ParseError> for StoreError {
    fn from(e: url::ParseError) -> Self {
        StoreError::Url(e)
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Network(e)
    }
}

/// Remote plate records. Every call is a network round trip that may fail.
#[allow(async_fn_in_trait)]
pub trait RecordStore {
    async fn create(
        &self,
        draft: &DraftRecord,
        image: Option<&CapturedImage>,
    ) -> Result<PersistedRecord, StoreError>;
    async fn update(
        &self,
        id: i64,
        draft: &DraftRecord,
        image: Option<&CapturedImage>,
    ) -> Result<PersistedRecord, StoreError>;
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<PersistedRecord>, StoreError>;
    async fn search(&self, query: &str) -> Result<Vec<PersistedRecord>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct HttpRecordStore {
    client: reqwest::Client,
    base: Url,
}

impl HttpRecordStore {
    pub fn new(client: reqwest::Client, mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        HttpRecordStore { client, base }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn image_url(&self, filename: &str) -> Result<Url, StoreError> {
        Ok(self.base.join("uploads/")?.join(filename)?)
    }

    pub async fn fetch_image(&self, filename: &str) -> Result<Bytes, StoreError> {
        let response = send(self.client.get(self.image_url(filename)?)).await?;
        Ok(response.bytes().await?)
    }

    fn record_url(&self, id: i64) -> Result<Url, StoreError> {
        Ok(self.base.join(&format!("plates/{}", id))?)
    }

    async fn form(
        &self,
        draft: &DraftRecord,
        image: Option<&CapturedImage>,
    ) -> Result<Form, StoreError> {
        let mut form = Form::new()
            .text("plate", draft.plate_text.clone())
            .text("confidence", draft.confidence.to_string());
        if let Some(location) = draft.location {
            form = form
                .text("latitude", location.latitude.to_string())
                .text("longitude", location.longitude.to_string());
            if let Some(accuracy) = location.accuracy_meters {
                form = form.text("accuracy", accuracy.to_string());
            }
        }
        if let Some(image) = image {
            let data = image.load().await.map_err(StoreError::Image)?;
            let prepared = upload::prepare_upload(&data);
            let mime = upload::mime_type(&prepared);
            let part = Part::bytes(prepared)
                .file_name(image.file_name())
                .mime_str(mime)?;
            form = form.part("image", part);
        }
        Ok(form)
    }
}

async fn send(request: RequestBuilder) -> Result<Response, StoreError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!("Backend request failed with {}: {}", status, body);
        return Err(StoreError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

async fn json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, StoreError> {
    let body = send(request).await?.text().await?;
    serde_json::from_str(&body).map_err(StoreError::Decode)
}

impl RecordStore for HttpRecordStore {
    async fn create(
        &self,
        draft: &DraftRecord,
        image: Option<&CapturedImage>,
    ) -> Result<PersistedRecord, StoreError> {
        let form = self.form(draft, image).await?;
        let record: PersistedRecord =
            json(self.client.post(self.base.join("plates")?).multipart(form)).await?;
        info!("Saved plate {} as record {}", record.plate_text, record.id);
        Ok(record)
    }

    async fn update(
        &self,
        id: i64,
        draft: &DraftRecord,
        image: Option<&CapturedImage>,
    ) -> Result<PersistedRecord, StoreError> {
        let form = self.form(draft, image).await?;
        let record: PersistedRecord =
            json(self.client.put(self.record_url(id)?).multipart(form)).await?;
        info!("Updated record {} to plate {}", id, record.plate_text);
        Ok(record)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        send(self.client.delete(self.record_url(id)?)).await?;
        info!("Deleted record {}", id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PersistedRecord>, StoreError> {
        let records: Vec<PersistedRecord> =
            json(self.client.get(self.base.join("plates")?)).await?;
        debug!("Loaded {} records", records.len());
        Ok(records)
    }

    async fn search(&self, query: &str) -> Result<Vec<PersistedRecord>, StoreError> {
        let mut url = self.base.join("plates")?;
        url.query_pairs_mut().append_pair("search", query);
        let records: Vec<PersistedRecord> = json(self.client.get(url)).await?;
        Ok(records
            .into_iter()
            .filter(|r| plate_matches(&r.plate_text, query))
            .collect())
    }
}
