//! Microsoft Graph Delta API for incremental synchronization
//!
//! ## Delta Query Flow
//!
//! 1. **Initial sync**: fetch a page with no cursor to enumerate everything,
//!    or ask for [`latest_delta_token`] to start from "now"
//! 2. **Follow pages**: each intermediate page carries an `@odata.nextLink`;
//!    the full link is handed back as the cursor for the next page
//! 3. **Save token**: the last page carries an `@odata.deltaLink`, kept as
//!    the token for the next session
//! 4. **Expiry**: a 410 Gone answer means the token is no longer accepted
//!    and surfaces as [`GraphError::ResyncRequired`]
//!
//! Cursors are stored as full URLs. A bare token (no scheme) is also
//! accepted and sent as the `token` query parameter.

use mirrordrive_core::{domain::newtypes::DeltaToken, ports::DeltaPage};
use reqwest::Method;
use tracing::{debug, warn};

use crate::{
    client::GraphClient,
    items::{convert_all, GraphCollection},
    GraphError,
};

/// Path for the delta endpoint relative to the Graph API base URL
const DELTA_PATH: &str = "/me/drive/root/delta";

/// Fetch one page of changes
pub async fn get_delta_page(
    client: &GraphClient,
    cursor: Option<&DeltaToken>,
) -> Result<DeltaPage, GraphError> {
    debug!(has_cursor = cursor.is_some(), "Fetching delta page");

    let response = match cursor {
        Some(c) if is_absolute(c.as_str()) => {
            client
                .execute_with_retry(|| client.request_url(Method::GET, c.as_str()))
                .await?
        }
        Some(c) => {
            client
                .execute_with_retry(|| {
                    client
                        .request(Method::GET, DELTA_PATH)
                        .query(&[("token", c.as_str())])
                })
                .await?
        }
        None => {
            client
                .execute_with_retry(|| client.request(Method::GET, DELTA_PATH))
                .await?
        }
    };

    let raw: GraphCollection = crate::client::parse_json(response).await?;
    let page = DeltaParser::parse_page(raw)?;

    debug!(
        items = page.items.len(),
        has_next = page.next_cursor.is_some(),
        has_token = page.delta_token.is_some(),
        "Received delta page"
    );
    if page.next_cursor.is_none() && page.delta_token.is_none() {
        warn!("Delta page carried neither nextLink nor deltaLink");
    }

    Ok(page)
}

/// Obtain a token for "now" without enumerating any items
pub async fn latest_delta_token(client: &GraphClient) -> Result<DeltaToken, GraphError> {
    let response = client
        .execute_with_retry(|| {
            client
                .request(Method::GET, DELTA_PATH)
                .query(&[("token", "latest")])
        })
        .await?;
    let raw: GraphCollection = crate::client::parse_json(response).await?;

    let link = raw
        .delta_link
        .ok_or_else(|| GraphError::InvalidResponse("latest delta response had no deltaLink".into()))?;
    DeltaParser::cursor(link)
}

/// Converts Graph delta responses into port-level pages
pub struct DeltaParser;

impl DeltaParser {
    pub(crate) fn parse_page(raw: GraphCollection) -> Result<DeltaPage, GraphError> {
        let items = convert_all(raw.value)?;
        let next_cursor = raw.next_link.map(Self::cursor).transpose()?;
        let delta_token = raw.delta_link.map(Self::cursor).transpose()?;

        Ok(DeltaPage {
            items,
            next_cursor,
            delta_token,
        })
    }

    fn cursor(link: String) -> Result<DeltaToken, GraphError> {
        DeltaToken::new(link).map_err(|e| GraphError::InvalidResponse(e.to_string()))
    }
}

fn is_absolute(cursor: &str) -> bool {
    cursor.starts_with("https://") || cursor.starts_with("http://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intermediate_page() {
        let raw: GraphCollection = serde_json::from_str(
            r#"{
                "value": [
                    {
                        "id": "file-001",
                        "name": "a.txt",
                        "size": 3,
                        "parentReference": { "path": "/drive/root:" },
                        "file": {}
                    }
                ],
                "@odata.nextLink": "https://graph.microsoft.com/v1.0/me/drive/root/delta?$skiptoken=p2"
            }"#,
        )
        .unwrap();

        let page = DeltaParser::parse_page(raw).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(!page.is_last());
        assert!(page.delta_token.is_none());
        assert_eq!(
            page.trailing_token().unwrap().as_str(),
            "https://graph.microsoft.com/v1.0/me/drive/root/delta?$skiptoken=p2"
        );
    }

    #[test]
    fn test_parse_last_page() {
        let raw: GraphCollection = serde_json::from_str(
            r#"{
                "value": [],
                "@odata.deltaLink": "https://graph.microsoft.com/v1.0/me/drive/root/delta?token=abc"
            }"#,
        )
        .unwrap();

        let page = DeltaParser::parse_page(raw).unwrap();
        assert!(page.is_last());
        assert!(page.items.is_empty());
        assert!(page.delta_token.is_some());
    }

    #[test]
    fn test_is_absolute() {
        assert!(is_absolute("https://graph.microsoft.com/v1.0/me/drive/root/delta?token=1"));
        assert!(is_absolute("http://127.0.0.1:1234/me/drive/root/delta?token=1"));
        assert!(!is_absolute("aTE09NjM"));
    }
}
