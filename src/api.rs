use std::future::Future;
use std::time::Duration;

use alloy_primitives::{Address, B256, hex};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::ExplorerConfig;
use crate::decoder::parse_hex_u64;
use crate::error::FetchError;
use crate::types::RawLog;

/// One log query: every `topic0` log emitted by `contract` from `from_block`
/// up to the latest block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub contract: Address,
    pub topic0: B256,
    pub from_block: u64,
}

/// Anything that can answer a [`LogQuery`].
pub trait LogSource {
    fn fetch_logs(&self, query: &LogQuery) -> impl Future<Output = Result<Vec<RawLog>, FetchError>>;
}

/// Envelope returned by Etherscan-style explorer APIs.
#[derive(Debug, Deserialize)]
pub struct ExplorerResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Classify an explorer response.
///
/// `status == "1"` carries the log array. Any other status is a rejection,
/// except the explorer's "No records found" reply to a range with no logs,
/// which is an empty success.
pub fn parse_response(response: ExplorerResponse) -> Result<Vec<RawLog>, FetchError> {
    if response.status == "1" {
        return serde_json::from_value(response.result)
            .map_err(|e| FetchError::SourceRejected(format!("malformed log array: {e}")));
    }

    let no_records = response.message.to_lowercase().contains("no records found")
        && response.result.as_array().is_none_or(|a| a.is_empty());
    if no_records {
        return Ok(Vec::new());
    }

    let detail = match response.result.as_str() {
        Some(result) if !result.is_empty() => format!("{}: {result}", response.message),
        _ => response.message,
    };
    Err(FetchError::SourceRejected(detail))
}

fn classify_transport(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else if err.is_decode() {
        FetchError::SourceRejected(format!("malformed response: {err}"))
    } else {
        FetchError::SourceUnavailable(err.to_string())
    }
}

/// HTTP client for the explorer `getLogs` endpoint.
pub struct ExplorerClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    page_size: u32,
    max_pages: u32,
    timeout: Duration,
}

impl ExplorerClient {
    pub fn new(config: &ExplorerConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: Url::parse(&config.api_url)?,
            api_key: config.api_key.clone(),
            page_size: config.page_size,
            max_pages: config.max_pages,
            timeout,
        })
    }

    /// Full request URL for one page of `query`.
    pub fn request_url(&self, query: &LogQuery, page: u32) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("module", "logs")
            .append_pair("action", "getLogs")
            .append_pair("address", &query.contract.to_string())
            .append_pair("fromBlock", &query.from_block.to_string())
            .append_pair("toBlock", "latest")
            .append_pair("topic0", &hex::encode_prefixed(query.topic0))
            .append_pair("page", &page.to_string())
            .append_pair("offset", &self.page_size.to_string())
            .append_pair("apikey", &self.api_key);
        url
    }

    async fn fetch_page(&self, query: &LogQuery, page: u32) -> Result<Vec<RawLog>, FetchError> {
        let resp = self
            .http
            .get(self.request_url(query, page))
            .send()
            .await
            .map_err(|e| classify_transport(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::SourceUnavailable(format!("HTTP {status}")));
        }

        let body: ExplorerResponse = resp
            .json()
            .await
            .map_err(|e| classify_transport(e, self.timeout))?;
        parse_response(body)
    }
}

/// Drop the logs of the last block in `logs` so that a truncated result
/// never ends partway through a block. Returns how many logs were dropped.
///
/// Nothing is dropped when every log belongs to the same block, since the
/// next query could not make progress otherwise.
pub fn hold_back_last_block(logs: &mut Vec<RawLog>) -> usize {
    let Some(last_block) = logs.last().and_then(|l| parse_hex_u64(&l.block_number)) else {
        return 0;
    };
    let keep = logs
        .iter()
        .rposition(|l| parse_hex_u64(&l.block_number) != Some(last_block))
        .map_or(0, |i| i + 1);
    if keep == 0 {
        return 0;
    }
    let dropped = logs.len() - keep;
    logs.truncate(keep);
    dropped
}

impl LogSource for ExplorerClient {
    /// Fetch all pages for `query`, stopping at the first short page or after
    /// `max_pages`. Logs keep the order the explorer returned them in.
    ///
    /// When the page limit cuts the range short, the logs of the last block
    /// are held back so the next query, which starts after the highest block
    /// returned here, refetches that block whole.
    async fn fetch_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, FetchError> {
        let mut all = Vec::new();

        for page in 1..=self.max_pages {
            let logs = self.fetch_page(query, page).await?;
            let count = logs.len();
            all.extend(logs);

            if count < self.page_size as usize {
                break;
            }
            if page == self.max_pages {
                let held_back = hold_back_last_block(&mut all);
                if held_back == 0 && !all.is_empty() {
                    warn!(
                        contract = %query.contract,
                        logs = all.len(),
                        "page limit reached inside a single block, raise explorer.max_pages"
                    );
                }
                debug!(
                    contract = %query.contract,
                    pages = page,
                    held_back,
                    "page limit reached, remaining logs picked up next cycle"
                );
            }
        }

        debug!(
            contract = %query.contract,
            from_block = query.from_block,
            logs = all.len(),
            "fetched logs"
        );
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ROLL_TOPIC;
    use crate::fixtures::{DICE, roll_log, tx_hash};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn response(value: serde_json::Value) -> ExplorerResponse {
        serde_json::from_value(value).expect("valid explorer envelope")
    }

    fn client() -> ExplorerClient {
        let config = ExplorerConfig {
            api_url: "https://api.sonicscan.org/api".to_string(),
            api_key: "KEY".to_string(),
            ..ExplorerConfig::default()
        };
        ExplorerClient::new(&config).expect("client builds")
    }

    #[test]
    fn success_returns_logs() {
        let logs = parse_response(response(json!({
            "status": "1",
            "message": "OK",
            "result": [{
                "address": "0xd288c47fefe57f84607aa43f705f388d2ae900ec",
                "topics": ["0x01"],
                "data": "0x",
                "blockNumber": "0x64",
                "timeStamp": "0x6553f100",
                "gasPrice": "0x1",
                "gasUsed": "0x2",
                "logIndex": "0x",
                "transactionHash": "0xabc",
                "transactionIndex": "0x3"
            }]
        })))
        .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, "0x64");
        assert_eq!(logs[0].log_index.as_deref(), Some("0x"));
        assert_eq!(logs[0].time_stamp.as_deref(), Some("0x6553f100"));
    }

    #[test]
    fn no_records_is_empty_success() {
        let logs = parse_response(response(json!({
            "status": "0",
            "message": "No records found",
            "result": []
        })))
        .unwrap();
        assert!(logs.is_empty());
    }

    #[test]
    fn error_status_is_rejected() {
        let err = parse_response(response(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached"
        })))
        .unwrap_err();
        assert_eq!(
            err,
            FetchError::SourceRejected("NOTOK: Max rate limit reached".to_string())
        );
    }

    #[test]
    fn malformed_result_is_rejected() {
        let err = parse_response(response(json!({
            "status": "1",
            "message": "OK",
            "result": "not an array"
        })))
        .unwrap_err();
        assert!(matches!(err, FetchError::SourceRejected(_)));
    }

    #[test]
    fn request_url_carries_query() {
        let query = LogQuery {
            contract: DICE,
            topic0: ROLL_TOPIC,
            from_block: 106,
        };
        let url = client().request_url(&query, 2);
        let pairs: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();

        assert_eq!(pairs["module"], "logs");
        assert_eq!(pairs["action"], "getLogs");
        assert_eq!(pairs["address"].to_lowercase(), DICE.to_string().to_lowercase());
        assert_eq!(pairs["fromBlock"], "106");
        assert_eq!(pairs["toBlock"], "latest");
        assert_eq!(pairs["topic0"], hex::encode_prefixed(ROLL_TOPIC));
        assert_eq!(pairs["page"], "2");
        assert_eq!(pairs["offset"], "1000");
        assert_eq!(pairs["apikey"], "KEY");
    }

    type Params = HashMap<String, String>;

    /// Minimal HTTP/1.1 server answering every GET with `respond(query)`.
    /// Returns the base URL and the query parameters of each request seen.
    async fn serve<F>(respond: F) -> (String, Arc<Mutex<Vec<Params>>>)
    where
        F: Fn(&Params) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let requests = Arc::clone(&seen);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf);
                let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let url = Url::parse(&format!("http://localhost{target}")).unwrap();
                let params: Params = url.query_pairs().into_owned().collect();

                let (code, body) = respond(&params);
                requests.lock().unwrap().push(params);
                let response = format!(
                    "HTTP/1.1 {code} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{addr}/api"), seen)
    }

    /// Serves `chain` (block, tx seed) in block order the way the explorer
    /// paginates `getLogs`.
    fn explorer(chain: Vec<(u64, u64)>) -> impl Fn(&Params) -> (u16, String) + Send + Sync {
        move |params| {
            let from: u64 = params["fromBlock"].parse().unwrap();
            let page: usize = params["page"].parse().unwrap();
            let offset: usize = params["offset"].parse().unwrap();
            let logs: Vec<RawLog> = chain
                .iter()
                .filter(|(block, _)| *block >= from)
                .skip((page - 1) * offset)
                .take(offset)
                .map(|(block, seed)| roll_log(DICE, *block, *seed, 50, 20, true))
                .collect();
            let body = if logs.is_empty() {
                json!({ "status": "0", "message": "No records found", "result": [] })
            } else {
                json!({ "status": "1", "message": "OK", "result": logs })
            };
            (200, body.to_string())
        }
    }

    fn client_for(base_url: String, page_size: u32, max_pages: u32) -> ExplorerClient {
        let config = ExplorerConfig {
            api_url: base_url,
            api_key: "KEY".to_string(),
            page_size,
            max_pages,
            timeout_secs: 5,
        };
        ExplorerClient::new(&config).expect("client builds")
    }

    fn query_from(from_block: u64) -> LogQuery {
        LogQuery {
            contract: DICE,
            topic0: ROLL_TOPIC,
            from_block,
        }
    }

    fn blocks(logs: &[RawLog]) -> Vec<u64> {
        logs.iter()
            .map(|l| parse_hex_u64(&l.block_number).unwrap())
            .collect()
    }

    fn pages(seen: &Mutex<Vec<Params>>) -> Vec<String> {
        seen.lock().unwrap().iter().map(|p| p["page"].clone()).collect()
    }

    #[tokio::test]
    async fn paginates_until_short_page() {
        let chain = vec![(100, 1), (101, 2), (102, 3), (103, 4), (104, 5)];
        let (url, seen) = serve(explorer(chain)).await;
        let client = client_for(url, 2, 10);

        let logs = client.fetch_logs(&query_from(0)).await.unwrap();

        assert_eq!(blocks(&logs), vec![100, 101, 102, 103, 104]);
        assert_eq!(pages(&seen), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn empty_range_is_empty_success() {
        let (url, seen) = serve(explorer(vec![(100, 1)])).await;
        let client = client_for(url, 2, 10);

        let logs = client.fetch_logs(&query_from(101)).await.unwrap();

        assert!(logs.is_empty());
        assert_eq!(pages(&seen), vec!["1"]);
    }

    #[tokio::test]
    async fn page_limit_holds_back_split_block() {
        let chain = vec![(100, 1), (101, 2), (101, 3)];
        let (url, seen) = serve(explorer(chain)).await;
        let client = client_for(url, 2, 1);

        // The single allowed page ends inside block 101.
        let first = client.fetch_logs(&query_from(0)).await.unwrap();
        assert_eq!(blocks(&first), vec![100]);

        let mut store = crate::store::ReconciliationStore::new();
        let events = crate::decoder::decode_batch(&first, DICE, crate::types::GameType::Dice).events;
        store.merge(DICE, events);
        assert_eq!(store.next_from_block(DICE), 101);

        // Block 101 fills the whole page on its own and is returned intact.
        let second = client.fetch_logs(&query_from(101)).await.unwrap();
        let events = crate::decoder::decode_batch(&second, DICE, crate::types::GameType::Dice).events;
        store.merge(DICE, events);

        for seed in 1..=3 {
            assert!(store.contains(&tx_hash(seed)), "tx {seed} missing");
        }
        let from_blocks: Vec<String> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|p| p["fromBlock"].clone())
            .collect();
        assert_eq!(from_blocks, vec!["0", "101"]);
    }

    #[test]
    fn hold_back_keeps_single_block_results() {
        let mut logs = vec![
            roll_log(DICE, 7, 1, 1, 1, true),
            roll_log(DICE, 7, 2, 1, 1, true),
        ];
        assert_eq!(hold_back_last_block(&mut logs), 0);
        assert_eq!(logs.len(), 2);

        logs.push(roll_log(DICE, 8, 3, 1, 1, true));
        assert_eq!(hold_back_last_block(&mut logs), 1);
        assert_eq!(blocks(&logs), vec![7, 7]);
    }

    #[tokio::test]
    async fn http_error_is_unavailable() {
        let (url, _) = serve(|_: &Params| (503, "busy".to_string())).await;
        let client = client_for(url, 2, 10);

        let err = client.fetch_logs(&query_from(0)).await.unwrap_err();
        assert!(matches!(err, FetchError::SourceUnavailable(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn non_json_body_is_rejected() {
        let (url, _) = serve(|_: &Params| (200, "<html>maintenance</html>".to_string())).await;
        let client = client_for(url, 2, 10);

        let err = client.fetch_logs(&query_from(0)).await.unwrap_err();
        assert!(matches!(err, FetchError::SourceRejected(_)));
    }

    #[tokio::test]
    async fn api_error_status_is_rejected() {
        let (url, _) = serve(|_: &Params| {
            let body = json!({ "status": "0", "message": "NOTOK", "result": "Invalid API Key" });
            (200, body.to_string())
        })
        .await;
        let client = client_for(url, 2, 10);

        let err = client.fetch_logs(&query_from(0)).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::SourceRejected("NOTOK: Invalid API Key".to_string())
        );
    }
}
