//! HTTP binding of [`DocumentStore`] for the hosted document database.

use chatmerge_core::store::{Fields, Page};
use chatmerge_core::{Collection, Document, DocumentStore, Filter, MigrationConfig, StoreError};
use serde::Serialize;
use serde_json::Value;
use std::cell::Cell;
use tracing::{debug, trace};
use url::Url;

const PROJECT_HEADER: &str = "x-appwrite-project";
const KEY_HEADER: &str = "x-appwrite-key";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    document_id: &'a str,
    data: &'a Fields,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    data: &'a Fields,
}

/// Blocking REST client. One agent, one timeout, shared by every call.
pub struct RestStore {
    agent: ureq::Agent,
    base: Url,
    project: String,
    api_key: String,
    database: String,
    chats: String,
    messages: String,
    requests: Cell<usize>,
}

impl RestStore {
    /// Build a client for the store described by `config`.
    ///
    /// # Errors
    ///
    /// Fails when the endpoint is not a URL that can carry a path.
    pub fn new(config: &MigrationConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&config.api_base())?;
        if base.cannot_be_a_base() {
            anyhow::bail!("endpoint {} cannot carry an API path", config.endpoint);
        }

        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            agent,
            base,
            project: config.project.clone(),
            api_key: config.api_key.clone(),
            database: config.database.clone(),
            chats: config.collection_id(Collection::Chats).to_string(),
            messages: config.collection_id(Collection::Messages).to_string(),
            requests: Cell::new(0),
        })
    }

    /// Number of HTTP calls issued so far.
    pub fn request_count(&self) -> usize {
        self.requests.get()
    }

    fn collection_id(&self, collection: Collection) -> &str {
        match collection {
            Collection::Chats => &self.chats,
            Collection::Messages => &self.messages,
        }
    }

    fn documents_url(&self, collection: Collection, id: Option<&str>) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| StoreError::Transport(format!("invalid API base {}", self.base)))?;
            segments.pop_if_empty().extend([
                "databases",
                self.database.as_str(),
                "collections",
                self.collection_id(collection),
                "documents",
            ]);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    fn list_url(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
        limit: usize,
        offset: usize,
    ) -> Result<Url, StoreError> {
        let mut url = self.documents_url(collection, None)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("limit", &limit.to_string())
                .append_pair("offset", &offset.to_string());
            if let Some(filter) = filter {
                query.append_pair("filters", &format!("{}=={}", filter.field, filter.value));
            }
        }
        Ok(url)
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        self.requests.set(self.requests.get() + 1);
        debug!(method, url = %url, "store request");
        self.agent
            .request_url(method, url)
            .set(PROJECT_HEADER, &self.project)
            .set(KEY_HEADER, &self.api_key)
            .set("content-type", "application/json")
    }
}

impl DocumentStore for RestStore {
    fn list(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
        limit: usize,
        offset: usize,
    ) -> Result<Page, StoreError> {
        let url = self.list_url(collection, filter, limit, offset)?;
        let body = read_json(self.request("GET", &url).call())?;
        decode_page(body, limit)
    }

    fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        let url = self.documents_url(collection, Some(id))?;
        match read_json(self.request("GET", &url).call()) {
            Ok(body) => Document::from_json(body).map(Some),
            Err(StoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn create(
        &self,
        collection: Collection,
        id: &str,
        data: &Fields,
    ) -> Result<Document, StoreError> {
        let url = self.documents_url(collection, None)?;
        let body = CreateBody {
            document_id: id,
            data,
        };
        let response = self
            .request("POST", &url)
            .send_json(body)
            .map_err(map_error)?;
        // Written once the status is 2xx; fall back to what was sent.
        let created = response
            .into_json::<Value>()
            .map_err(|err| StoreError::Decode(err.to_string()))
            .and_then(Document::from_json)
            .unwrap_or_else(|err| {
                debug!(id, error = %err, "create response not decodable; using request body");
                Document::new(id, data.clone())
            });
        Ok(created)
    }

    fn update(
        &self,
        collection: Collection,
        id: &str,
        data: &Fields,
    ) -> Result<Document, StoreError> {
        let url = self.documents_url(collection, Some(id))?;
        let response = read_json(self.request("PATCH", &url).send_json(UpdateBody { data }))?;
        Document::from_json(response)
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let url = self.documents_url(collection, Some(id))?;
        self.request("DELETE", &url).call().map_err(map_error)?;
        Ok(())
    }
}

fn read_json(result: Result<ureq::Response, ureq::Error>) -> Result<Value, StoreError> {
    let response = result.map_err(map_error)?;
    response
        .into_json::<Value>()
        .map_err(|err| StoreError::Decode(err.to_string()))
}

fn map_error(err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Status(404, _) => StoreError::NotFound,
        ureq::Error::Status(409, _) => StoreError::Conflict,
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            trace!(status, body = %body, "store error body");
            StoreError::Status {
                status,
                message: error_message(&body),
            }
        }
        ureq::Error::Transport(transport) => StoreError::Transport(transport.to_string()),
    }
}

/// The store's `message` field when the body is a JSON error, else the body.
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    if let Some(message) = parsed
        .as_ref()
        .and_then(|value| value.get("message"))
        .and_then(Value::as_str)
    {
        return message.to_string();
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.to_string()
    }
}

fn decode_page(body: Value, limit: usize) -> Result<Page, StoreError> {
    let Value::Object(mut object) = body else {
        return Err(StoreError::Decode("list response is not an object".to_string()));
    };
    let Some(Value::Array(raw)) = object.remove("documents") else {
        return Err(StoreError::Decode(
            "list response has no `documents` array".to_string(),
        ));
    };

    let documents = raw
        .into_iter()
        .map(Document::from_json)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page {
        has_more: documents.len() >= limit,
        documents,
    })
}
