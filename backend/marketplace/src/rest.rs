//! REST client for the platform — contract calls over the bloc API, account
//! reads over the strato API and filters over the search index.
//!
//! No call is retried here. The only retry in the system is the existence
//! poll in [`crate::poll`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::errors::{MarketError, Result};
use crate::models::Wei;
use crate::platform::{ContractRef, Credential, Platform, UploadedContract};
use crate::query::Query;

#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    bloc_url: String,
    strato_url: String,
    search_url: String,
    chain_id: Option<String>,
}

impl RestClient {
    pub fn new(
        client: Client,
        bloc_url: impl Into<String>,
        strato_url: impl Into<String>,
        search_url: impl Into<String>,
        chain_id: Option<String>,
    ) -> Self {
        Self {
            client,
            bloc_url: bloc_url.into(),
            strato_url: strato_url.into(),
            search_url: search_url.into(),
            chain_id,
        }
    }

    /// `{bloc}/seg/seg/…`, with path segments escaped and the chain id attached.
    fn bloc(&self, segments: &[&str]) -> Result<Url> {
        Ok(self.on_chain(join(&self.bloc_url, segments)?))
    }

    /// `{strato}/seg/seg/…`, scoped to the configured chain like [`Self::bloc`].
    fn strato(&self, segments: &[&str]) -> Result<Url> {
        Ok(self.on_chain(join(&self.strato_url, segments)?))
    }

    fn on_chain(&self, mut url: Url) -> Url {
        if let Some(chain_id) = &self.chain_id {
            url.query_pairs_mut().append_pair("chainid", chain_id);
        }
        url
    }

    /// Send a request and decode the body, mapping non-2xx statuses to
    /// [`MarketError::Platform`].
    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(MarketError::Platform {
                status: status.as_u16(),
                message: text,
            });
        }

        // Some bloc endpoints answer with a bare address rather than JSON.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[async_trait]
impl Platform for RestClient {
    async fn call_method(
        &self,
        caller: &Credential,
        contract: &ContractRef,
        method: &str,
        args: Value,
        value: Wei,
    ) -> Result<Vec<Value>> {
        let mut url = self.bloc(&[
            "users",
            &caller.username,
            &caller.address,
            "contract",
            &contract.name,
            &contract.address,
            "call",
        ])?;
        url.query_pairs_mut().append_key_only("resolve");

        debug!(contract = %contract.name, method, %value, "callMethod");

        let body = self
            .send(self.client.post(url).json(&json!({
                "password": caller.password,
                "method": method,
                "args": args,
                "value": value.to_string(),
            })))
            .await?;

        Ok(call_outputs(body))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Value>> {
        let url = query.to_url(&self.search_url)?;
        let body = self.send(self.client.get(url)).await?;
        match body {
            Value::Array(rows) => {
                debug!("query {query} → {} rows", rows.len());
                Ok(rows)
            }
            other => Err(MarketError::Decode(format!(
                "query {query} returned a non-array body: {other}"
            ))),
        }
    }

    async fn get_state(&self, contract: &ContractRef) -> Result<Map<String, Value>> {
        let url = self.bloc(&["contracts", &contract.name, &contract.address, "state"])?;
        match self.send(self.client.get(url)).await? {
            Value::Object(state) => Ok(state),
            other => Err(MarketError::Decode(format!(
                "state of {} is not an object: {other}",
                contract.name
            ))),
        }
    }

    async fn get_key(&self, username: &str) -> Result<String> {
        let url = self.bloc(&["users", username])?;
        let body = self.send(self.client.get(url)).await?;
        body.as_array()
            .and_then(|keys| keys.first())
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| MarketError::Decode(format!("no key found for user {username}")))
    }

    async fn create_user(&self, username: &str, password: &str) -> Result<String> {
        let mut url = self.bloc(&["users", username])?;
        url.query_pairs_mut().append_key_only("faucet");

        let body = self
            .send(self.client.post(url).form(&[("password", password)]))
            .await?;
        body.as_str()
            .map(|s| s.trim().trim_matches('"').to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MarketError::Decode(format!("createUser returned {body}")))
    }

    async fn get_balance(&self, address: &str) -> Result<Wei> {
        let mut url = self.strato(&["account"])?;
        url.query_pairs_mut().append_pair("address", address);

        let body = self.send(self.client.get(url)).await?;
        let Some(account) = body.as_array().and_then(|accounts| accounts.first()) else {
            // Accounts that never received funds are absent.
            return Ok(Wei::ZERO);
        };
        let raw = match account.get("balance") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(MarketError::Decode(format!("account has no balance: {account}"))),
        };
        Wei::parse(&raw).ok_or_else(|| MarketError::Decode(format!("invalid balance {raw}")))
    }

    async fn upload_contract(
        &self,
        admin: &Credential,
        name: &str,
        source: &str,
        args: Value,
    ) -> Result<UploadedContract> {
        let mut url = self.bloc(&["users", &admin.username, &admin.address, "contract"])?;
        url.query_pairs_mut().append_key_only("resolve");

        debug!(contract = name, "uploadContract");

        let body = self
            .send(self.client.post(url).json(&json!({
                "password": admin.password,
                "contract": name,
                "src": source,
                "args": args,
            })))
            .await?;
        upload_result(name, &body)
    }

    async fn compile_search(
        &self,
        searchable: &[&str],
        contract_name: &str,
        source: &str,
    ) -> Result<()> {
        let url = self.bloc(&["search", "compile"])?;
        debug!(?searchable, contract_name, "compileSearch");
        self.send(self.client.post(url).json(&json!([{
            "searchable": searchable,
            "contractName": contract_name,
            "source": source,
        }])))
        .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// Response decoding
// ─────────────────────────────────────────────────────────

fn join(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|e| MarketError::Config(format!("Invalid URL {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| MarketError::Config(format!("URL cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Normalise a resolved call body into its list of outputs.
///
/// The bloc API wraps outputs as `{"data": {"contents": [...]}}`; older
/// versions return the bare array, and single-output calls may return a
/// scalar.
fn call_outputs(body: Value) -> Vec<Value> {
    let contents = body
        .pointer("/data/contents")
        .or_else(|| body.get("contents"))
        .cloned();
    match contents.unwrap_or(body) {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        scalar => vec![scalar],
    }
}

fn upload_result(name: &str, body: &Value) -> Result<UploadedContract> {
    let contents = body
        .pointer("/data/contents")
        .filter(|c| c.is_object())
        .unwrap_or(body);

    let address = match contents {
        Value::String(s) => Some(s.clone()),
        other => other.get("address").and_then(Value::as_str).map(String::from),
    }
    .ok_or_else(|| MarketError::Decode(format!("upload of {name} returned no address: {body}")))?;

    let code_hash = contents
        .get("codeHash")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(UploadedContract {
        contract: ContractRef::new(name, address),
        code_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve;
    use axum::extract::Query as Params;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;

    fn client() -> RestClient {
        RestClient::new(
            Client::new(),
            "http://node/bloc/v2.2/",
            "http://node/strato-api/eth/v1.2",
            "http://node/cirrus/search",
            Some("c0ffee".to_string()),
        )
    }

    #[test]
    fn bloc_url_escapes_segments_and_adds_chain() {
        let url = client()
            .bloc(&["users", "jane doe", "ab12", "contract", "Bid", "cd34", "call"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://node/bloc/v2.2/users/jane%20doe/ab12/contract/Bid/cd34/call?chainid=c0ffee"
        );
    }

    #[test]
    fn strato_url_adds_chain() {
        let url = client().strato(&["account"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://node/strato-api/eth/v1.2/account?chainid=c0ffee"
        );
    }

    #[test]
    fn join_rejects_bad_base() {
        assert!(matches!(
            join("mailto:someone", &["x"]),
            Err(MarketError::Config(_))
        ));
    }

    #[test]
    fn call_outputs_shapes() {
        assert_eq!(
            call_outputs(json!({"status": "Success", "data": {"contents": ["1", 7]}})),
            vec![json!("1"), json!(7)]
        );
        assert_eq!(call_outputs(json!(["1"])), vec![json!("1")]);
        assert_eq!(call_outputs(json!(true)), vec![json!(true)]);
        assert!(call_outputs(Value::Null).is_empty());
    }

    #[test]
    fn upload_result_shapes() {
        let wrapped = json!({
            "data": {"contents": {"address": "beef", "codeHash": "h1", "name": "AdminInterface"}}
        });
        let up = upload_result("AdminInterface", &wrapped).unwrap();
        assert_eq!(up.contract, ContractRef::new("AdminInterface", "beef"));
        assert_eq!(up.code_hash, "h1");

        let bare = upload_result("AdminInterface", &json!("beef")).unwrap();
        assert_eq!(bare.contract.address, "beef");
        assert_eq!(bare.code_hash, "");

        assert!(upload_result("AdminInterface", &json!({"status": "x"})).is_err());
    }

    fn local_client(base: &str, chain_id: Option<&str>) -> RestClient {
        RestClient::new(
            Client::new(),
            format!("{base}/bloc"),
            format!("{base}/strato"),
            format!("{base}/search"),
            chain_id.map(String::from),
        )
    }

    #[tokio::test]
    async fn balance_read_is_scoped_to_chain() {
        let router = Router::new().route(
            "/strato/account",
            get(|Params(params): Params<HashMap<String, String>>| async move {
                let param = |key: &str| params.get(key).map(String::as_str);
                if param("chainid") == Some("c0ffee") && param("address") == Some("abcd") {
                    Json(json!([{ "balance": "5000000000000000000" }]))
                } else {
                    Json(json!([]))
                }
            }),
        );
        let base = serve(router).await;

        let on_chain = local_client(&base, Some("c0ffee"));
        assert_eq!(on_chain.get_balance("abcd").await.unwrap(), Wei::from_ether(5));

        let main_chain = local_client(&base, None);
        assert_eq!(main_chain.get_balance("abcd").await.unwrap(), Wei::ZERO);
    }

    #[tokio::test]
    async fn non_success_status_is_platform_error() {
        let router = Router::new().route(
            "/bloc/users/:user/:address/contract/:name/:contract/call",
            post(|| async { (StatusCode::BAD_REQUEST, "insufficient balance") }),
        );
        let base = serve(router).await;

        let err = local_client(&base, None)
            .call_method(
                &Credential::new("buyer1", "pw", "aa"),
                &ContractRef::new("Bid", "bb"),
                "setBidState",
                json!({ "newState": 2 }),
                Wei::from_ether(1),
            )
            .await
            .unwrap_err();
        match err {
            MarketError::Platform { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "insufficient balance");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_array_search_body_is_decode_error() {
        let router = Router::new().route(
            "/search/Bid",
            get(|| async { Json(json!({ "message": "relation does not exist" })) }),
        );
        let base = serve(router).await;

        let err = local_client(&base, None)
            .query(&Query::table("Bid").eq("id", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Decode(_)));
    }
}
