use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bson::Document;
use mongodb::{
    Client, Collection, IndexModel,
    error::{CommandError, Error, ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions, ServerApi, ServerApiVersion},
};

use super::MappingStore;
use crate::{
    error::{StoreError, UniqueField},
    models::{ShortId, UrlMapping},
};

const COLLECTION: &str = "urls";
const DUPLICATE_KEY_CODE: i32 = 11000;
const SHORT_ID_INDEX: &str = "shortUrl_unique";
const ORIGINAL_URL_INDEX: &str = "originalUrl_unique";
const INDEX_OPTIONS_CONFLICT_CODE: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT_CODE: i32 = 86;

#[derive(Clone)]
pub struct MongoStore {
    urls: Collection<UrlMapping>,
}

impl MongoStore {
    pub async fn new(
        connection_string: &str,
        database: &str,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let mut client_options = ClientOptions::parse(connection_string).await?;
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);
        client_options.server_selection_timeout = Some(timeout);
        client_options.connect_timeout = Some(timeout);

        let client = Client::with_options(client_options)?;
        let urls = client.database(database).collection::<UrlMapping>(COLLECTION);

        Ok(Self { urls })
    }

    /// Creates the unique indexes both lookups rely on. Safe to run on every
    /// start.
    ///
    /// Fails on a collection written without these indexes when it holds
    /// duplicate urls, or when it already indexes the same keys under other
    /// names. The error says which.
    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let unique = |field: &str, name: &str| {
            let mut keys = Document::new();
            keys.insert(field, 1);
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).name(name.to_owned()).build())
                .build()
        };

        let result = self
            .urls
            .create_indexes([
                unique("shortUrl", SHORT_ID_INDEX),
                unique("originalUrl", ORIGINAL_URL_INDEX),
            ])
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => match command_code(&err).and_then(index_failure_hint) {
                Some(hint) => Err(err).context(hint),
                None => Err(err.into()),
            },
        }
    }
}

fn command_code(err: &Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(CommandError { code, .. }) => Some(*code),
        _ => None,
    }
}

fn index_failure_hint(code: i32) -> Option<&'static str> {
    match code {
        DUPLICATE_KEY_CODE => Some(
            "collection `urls` already holds duplicate shortUrl or originalUrl values; \
             remove the duplicate documents and restart",
        ),
        INDEX_OPTIONS_CONFLICT_CODE | INDEX_KEY_SPECS_CONFLICT_CODE => Some(
            "collection `urls` already indexes shortUrl or originalUrl under another name \
             or options; drop that index or rename it to shortUrl_unique / originalUrl_unique",
        ),
        _ => None,
    }
}

#[async_trait]
impl MappingStore for MongoStore {
    async fn find_by_original_url(&self, url: &str) -> Result<Option<UrlMapping>, StoreError> {
        let mapping = self.urls.find_one(bson::doc! { "originalUrl": url }).await?;

        Ok(mapping)
    }

    async fn find_by_short_id(&self, id: &ShortId) -> Result<Option<UrlMapping>, StoreError> {
        let mapping = self
            .urls
            .find_one(bson::doc! { "shortUrl": id.as_str() })
            .await?;

        Ok(mapping)
    }

    async fn insert(&self, mapping: &UrlMapping) -> Result<(), StoreError> {
        self.urls.insert_one(mapping).await?;

        Ok(())
    }
}

impl From<Error> for StoreError {
    fn from(err: Error) -> Self {
        if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref() {
            if write_error.code == DUPLICATE_KEY_CODE {
                let field = if write_error.message.contains(ORIGINAL_URL_INDEX) {
                    UniqueField::OriginalUrl
                } else {
                    UniqueField::ShortId
                };
                return Self::DuplicateKey(field);
            }
        }

        Self::Unavailable(err.to_string())
    }
}
