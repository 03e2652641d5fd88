use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{AssetUpload, Catalog, CatalogFuture, CreatedSet, RemoteAsset, RemoteSet, SetLookup};
use crate::credential::Credential;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct HttpCatalogConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

/// JSON REST catalog client, bearer-authenticated.
pub struct HttpCatalog {
    config: HttpCatalogConfig,
    credential: Credential,
    client: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(config: HttpCatalogConfig, credential: Credential) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::InvalidConfig {
                message: format!("http client build failed: {e}"),
            })?;
        Ok(Self {
            config,
            credential,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let res = self
            .client
            .get(self.url(path))
            .bearer_auth(self.credential.bearer())
            .query(query)
            .send()
            .await
            .map_err(|e| Error::RemoteUnavailable {
                message: format!("GET {path} failed: {e}"),
            })?;

        let status = res.status();
        let body = res.text().await.map_err(|e| Error::RemoteUnavailable {
            message: format!("GET {path} read response failed: {e}"),
        })?;
        if !status.is_success() {
            return Err(lookup_status_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| Error::RemoteUnavailable {
            message: format!("GET {path} invalid json: {e}; body={body}"),
        })
    }

    async fn post_asset<T: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
        display_name: &str,
    ) -> Result<T> {
        let res = self
            .client
            .post(self.url(path))
            .bearer_auth(self.credential.bearer())
            .multipart(form)
            .send()
            .await
            .map_err(upload_request_error)?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| Error::upload_transient(format!("read response failed: {e}")))?;
        if !status.is_success() {
            return Err(upload_status_error(status, &body, display_name));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::upload_permanent(format!("invalid json: {e}; body={body}")))
    }

    async fn walk_assets(&self, set_id: &str) -> Result<Vec<RemoteAsset>> {
        let mut assets = Vec::new();
        let mut page = 1u32;
        loop {
            let res: AssetPage = self
                .get_json(
                    &format!("sets/{set_id}/assets"),
                    &[("page", page.to_string())],
                )
                .await?;
            let fetched = res.assets.len();
            assets.extend(res.assets.into_iter().map(|a| RemoteAsset {
                remote_id: a.id,
                display_name: a.title,
            }));
            debug!(
                event = "catalog.assets_page",
                set_id,
                page,
                pages = res.pages,
                fetched,
                "catalog.assets_page"
            );
            if fetched == 0 || page >= res.pages {
                break;
            }
            page += 1;
        }
        Ok(assets)
    }
}

fn asset_form(asset: AssetUpload) -> reqwest::multipart::Form {
    let part =
        reqwest::multipart::Part::bytes(asset.bytes).file_name(asset.display_name.clone());
    reqwest::multipart::Form::new()
        .text("title", asset.display_name)
        .text("tags", asset.tags.join(" "))
        .text("public", if asset.is_public { "1" } else { "0" })
        .part("file", part)
}

impl Catalog for HttpCatalog {
    fn provider(&self) -> &'static str {
        "http.rest"
    }

    fn find_set_by_name<'a>(&'a self, name: &'a str) -> CatalogFuture<'a, SetLookup> {
        Box::pin(async move {
            let res: SetList = self.get_json("sets", &[("name", name.to_string())]).await?;
            let Some(found) = res.sets.into_iter().find(|s| s.name == name) else {
                return Ok(SetLookup::Absent);
            };
            let assets = self.walk_assets(&found.id).await?;
            Ok(SetLookup::Present(RemoteSet {
                remote_id: found.id,
                name: found.name,
                tags: found.tags,
                assets,
            }))
        })
    }

    fn create_set<'a>(
        &'a self,
        name: &'a str,
        tags: &'a [String],
        first_asset: AssetUpload,
    ) -> CatalogFuture<'a, CreatedSet> {
        Box::pin(async move {
            let display_name = first_asset.display_name.clone();
            let form = asset_form(first_asset).text("name", name.to_string());
            let form = form.text("set_tags", tags.join(" "));
            let res: CreateSetResponse = self
                .post_asset("sets", form, &display_name)
                .await
                .map_err(|e| set_conflict(e, name))?;
            Ok(CreatedSet {
                set_id: res.set_id,
                asset_id: res.asset_id,
            })
        })
    }

    fn add_asset_to_set<'a>(
        &'a self,
        set_id: &'a str,
        asset: AssetUpload,
    ) -> CatalogFuture<'a, String> {
        Box::pin(async move {
            let display_name = asset.display_name.clone();
            let res: AddAssetResponse = self
                .post_asset(&format!("sets/{set_id}/assets"), asset_form(asset), &display_name)
                .await?;
            Ok(res.asset_id)
        })
    }
}

fn lookup_status_error(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::AuthRequired {
            message: format!("http {status}: {body}"),
        },
        _ => Error::RemoteUnavailable {
            message: format!("http {status}: {body}"),
        },
    }
}

fn upload_status_error(status: StatusCode, body: &str, display_name: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::AuthRequired {
            message: format!("http {status}: {body}"),
        },
        StatusCode::CONFLICT => Error::AlreadyPresent {
            display_name: display_name.to_string(),
        },
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
            Error::upload_transient(format!("http {status}: {body}"))
        }
        _ => Error::upload_permanent(format!("http {status}: {body}")),
    }
}

/// On `POST /sets` a 409 means the set name is taken, not the asset.
fn set_conflict(e: Error, set_name: &str) -> Error {
    match e {
        Error::AlreadyPresent { .. } => Error::SetExists {
            name: set_name.to_string(),
        },
        other => other,
    }
}

fn upload_request_error(e: reqwest::Error) -> Error {
    if e.is_builder() {
        Error::upload_permanent(format!("request build failed: {e}"))
    } else {
        Error::upload_transient(format!("request failed: {e}"))
    }
}

#[derive(Debug, Deserialize)]
struct SetList {
    sets: Vec<SetEntry>,
}

#[derive(Debug, Deserialize)]
struct SetEntry {
    id: String,
    name: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AssetPage {
    assets: Vec<AssetEntry>,
    #[serde(default = "default_pages")]
    pages: u32,
}

fn default_pages() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct AssetEntry {
    id: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct CreateSetResponse {
    set_id: String,
    asset_id: String,
}

#[derive(Debug, Deserialize)]
struct AddAssetResponse {
    asset_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_status_mapping() {
        let e = upload_status_error(StatusCode::TOO_MANY_REQUESTS, "slow down", "a.jpg");
        assert!(e.is_retryable());

        let e = upload_status_error(StatusCode::BAD_GATEWAY, "", "a.jpg");
        assert!(e.is_retryable());

        let e = upload_status_error(StatusCode::BAD_REQUEST, "bad", "a.jpg");
        assert!(!e.is_retryable());
        assert!(!e.is_fatal());

        let e = upload_status_error(StatusCode::UNAUTHORIZED, "revoked", "a.jpg");
        assert!(e.is_fatal());

        let e = upload_status_error(StatusCode::CONFLICT, "", "a.jpg");
        assert!(matches!(e, Error::AlreadyPresent { display_name } if display_name == "a.jpg"));
    }

    #[test]
    fn conflict_on_set_creation_means_set_exists() {
        let e = upload_status_error(StatusCode::CONFLICT, "name taken", "a.jpg");
        assert!(matches!(set_conflict(e, "Trip"), Error::SetExists { name } if name == "Trip"));

        let e = upload_status_error(StatusCode::BAD_GATEWAY, "", "a.jpg");
        assert!(set_conflict(e, "Trip").is_retryable());
    }

    #[test]
    fn lookup_status_mapping_is_always_fatal() {
        assert!(matches!(
            lookup_status_error(StatusCode::FORBIDDEN, ""),
            Error::AuthRequired { .. }
        ));
        assert!(matches!(
            lookup_status_error(StatusCode::SERVICE_UNAVAILABLE, ""),
            Error::RemoteUnavailable { .. }
        ));
    }

    #[test]
    fn asset_page_defaults_to_single_page() {
        let page: AssetPage =
            serde_json::from_str(r#"{"assets":[{"id":"1","title":"a.jpg"}]}"#).unwrap();
        assert_eq!(page.pages, 1);
        assert_eq!(page.assets[0].title, "a.jpg");
    }

    #[test]
    fn url_joins_without_double_slash() {
        let catalog = HttpCatalog::new(
            HttpCatalogConfig {
                base_url: "https://example.invalid/v1/".to_string(),
                request_timeout: Duration::from_secs(5),
            },
            Credential::new("t"),
        )
        .unwrap();
        assert_eq!(catalog.url("sets"), "https://example.invalid/v1/sets");
    }
}
