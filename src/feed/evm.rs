use std::collections::HashSet;
use std::str::FromStr;

use ethers::abi::{decode, ParamType, Token};
use ethers::types::Address;
use ethers::utils::{id, keccak256};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::error::DecodeError;
use crate::types::{Chain, TradeEvent};

/// Well-known mainnet router addresses the pending-tx decoders match against.
pub const UNISWAP_V2_ROUTER: &str = "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D";
pub const UNISWAP_V3_ROUTER: &str = "0xE592427A0AEce92De3Edee1F18E0157C05861564";
pub const ONEINCH_AGGREGATION_ROUTER: &str = "0x1111111254EEB25477B68fb85Ed929f73A960582";

pub fn default_routers() -> Vec<(Address, &'static str)> {
    vec![
        (UNISWAP_V2_ROUTER.parse().expect("valid address literal"), "v2"),
        (UNISWAP_V3_ROUTER.parse().expect("valid address literal"), "v3"),
        (ONEINCH_AGGREGATION_ROUTER.parse().expect("valid address literal"), "1inch"),
    ]
}

/// A pending (mempool) transaction as the upstream feed reports it: enough of the
/// envelope to select a decoder and extract calldata, nothing chain-specific beyond that.
#[derive(Debug, Deserialize)]
pub struct PendingTxMessage {
    pub to: String,
    pub input: String,
    pub from: String,
    pub hash: String,
}

/// A confirmed `Swap` log, pre-joined by the upstream feed with the pool's token
/// pair (a real indexer feed carries this; decoding it from raw log data alone would
/// require a separate pool-metadata lookup this module has no business performing).
#[derive(Debug, Deserialize)]
pub struct SwapLogMessage {
    pub topics: Vec<String>,
    pub data: String,
    pub token0: String,
    pub token1: String,
    pub tx_hash: String,
}

fn selector_of(signature: &str) -> [u8; 4] {
    id(signature)
}

fn swap_topic0() -> [u8; 32] {
    keccak256(b"Swap(address,address,int256,int256,uint160,uint128,int24)")
}

fn hex_decode(input: &str) -> Result<Vec<u8>, String> {
    hex::decode(input.trim_start_matches("0x")).map_err(|e| e.to_string())
}

/// `swapExactTokensForTokens(uint256,uint256,address[],address,uint256)`, the V2
/// router's canonical selector.
pub fn decode_router_v2(msg: &PendingTxMessage, router: Address, watched: &HashSet<String>) -> Result<Option<TradeEvent>, DecodeError> {
    let malformed = |reason: String| DecodeError::Malformed { tx_hash: msg.hash.clone(), reason };

    let Ok(to) = Address::from_str(&msg.to) else { return Ok(None) };
    if to != router {
        return Ok(None);
    }
    if !watched.contains(&msg.from.to_lowercase()) {
        return Ok(None);
    }

    let calldata = hex_decode(&msg.input).map_err(malformed)?;
    let expected_selector = selector_of("swapExactTokensForTokens(uint256,uint256,address[],address,uint256)");
    if calldata.len() < 4 || calldata[0..4] != expected_selector {
        return Ok(None);
    }

    let tokens = decode(
        &[
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Address,
            ParamType::Uint(256),
        ],
        &calldata[4..],
    )
    .map_err(|e| malformed(e.to_string()))?;

    let [Token::Uint(amount_in), Token::Uint(amount_out_min), Token::Array(path), ..] = tokens.as_slice() else {
        return Err(malformed("unexpected ABI token shape".into()));
    };

    let (Some(Token::Address(token_in)), Some(Token::Address(token_out))) = (path.first(), path.last()) else {
        return Err(malformed("empty swap path".into()));
    };

    let event = TradeEvent::new(
        msg.from.clone(),
        format!("{token_in:#x}"),
        format!("{token_out:#x}"),
        Decimal::from_str(&amount_in.to_string()).map_err(|e| malformed(e.to_string()))?,
        Decimal::from_str(&amount_out_min.to_string()).map_err(|e| malformed(e.to_string()))?,
        msg.hash.clone(),
        chrono::Utc::now().timestamp(),
        Chain::Evm,
    )
    .map_err(|e| malformed(e.to_string()))?;

    Ok(Some(event))
}

/// `exactInput((bytes,address,uint256,uint256,uint256))`, Uniswap V3 `SwapRouter`'s
/// single-struct overload. The struct's `path` field packs `(address, uint24 fee)*`
/// hop segments; the first and last 20-byte address runs are the trade's token_in/out.
pub fn decode_router_v3(msg: &PendingTxMessage, router: Address, watched: &HashSet<String>) -> Result<Option<TradeEvent>, DecodeError> {
    let malformed = |reason: String| DecodeError::Malformed { tx_hash: msg.hash.clone(), reason };

    let Ok(to) = Address::from_str(&msg.to) else { return Ok(None) };
    if to != router {
        return Ok(None);
    }
    if !watched.contains(&msg.from.to_lowercase()) {
        return Ok(None);
    }

    let calldata = hex_decode(&msg.input).map_err(malformed)?;
    let expected_selector = selector_of("exactInput((bytes,address,uint256,uint256,uint256))");
    if calldata.len() < 4 || calldata[0..4] != expected_selector {
        return Ok(None);
    }

    let tokens = decode(
        &[ParamType::Tuple(vec![
            ParamType::Bytes,
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
        ])],
        &calldata[4..],
    )
    .map_err(|e| malformed(e.to_string()))?;

    let Some(Token::Tuple(fields)) = tokens.into_iter().next() else {
        return Err(malformed("unexpected ABI token shape".into()));
    };
    let [Token::Bytes(path), _recipient, _deadline, Token::Uint(amount_in), Token::Uint(amount_out_min)] = fields.as_slice() else {
        return Err(malformed("unexpected ExactInputParams shape".into()));
    };

    if path.len() < 20 {
        return Err(malformed("V3 path too short to contain a token address".into()));
    }
    let token_in = Address::from_slice(&path[0..20]);
    let token_out = Address::from_slice(&path[path.len() - 20..]);

    let event = TradeEvent::new(
        msg.from.clone(),
        format!("{token_in:#x}"),
        format!("{token_out:#x}"),
        Decimal::from_str(&amount_in.to_string()).map_err(|e| malformed(e.to_string()))?,
        Decimal::from_str(&amount_out_min.to_string()).map_err(|e| malformed(e.to_string()))?,
        msg.hash.clone(),
        chrono::Utc::now().timestamp(),
        Chain::Evm,
    )
    .map_err(|e| malformed(e.to_string()))?;

    Ok(Some(event))
}

/// `swap(address,(address,address,address,address,uint256,uint256,uint256),bytes,bytes)`,
/// 1inch `AggregationRouter`'s generic entrypoint. Only the fixed-offset
/// `SwapDescription` tuple is read; the trailing `permit`/`data` bytes are unused.
pub fn decode_router_1inch(msg: &PendingTxMessage, router: Address, watched: &HashSet<String>) -> Result<Option<TradeEvent>, DecodeError> {
    let malformed = |reason: String| DecodeError::Malformed { tx_hash: msg.hash.clone(), reason };

    let Ok(to) = Address::from_str(&msg.to) else { return Ok(None) };
    if to != router {
        return Ok(None);
    }
    if !watched.contains(&msg.from.to_lowercase()) {
        return Ok(None);
    }

    let calldata = hex_decode(&msg.input).map_err(malformed)?;
    let expected_selector = selector_of("swap(address,(address,address,address,address,uint256,uint256,uint256),bytes,bytes)");
    if calldata.len() < 4 || calldata[0..4] != expected_selector {
        return Ok(None);
    }

    let tokens = decode(
        &[
            ParamType::Address,
            ParamType::Tuple(vec![
                ParamType::Address,
                ParamType::Address,
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
            ]),
            ParamType::Bytes,
            ParamType::Bytes,
        ],
        &calldata[4..],
    )
    .map_err(|e| malformed(e.to_string()))?;

    let Some(Token::Tuple(desc)) = tokens.into_iter().nth(1) else {
        return Err(malformed("unexpected SwapDescription shape".into()));
    };
    let [Token::Address(src_token), Token::Address(dst_token), _src_receiver, _dst_receiver, Token::Uint(amount), Token::Uint(min_return), _flags] =
        desc.as_slice()
    else {
        return Err(malformed("unexpected SwapDescription field shape".into()));
    };

    let event = TradeEvent::new(
        msg.from.clone(),
        format!("{src_token:#x}"),
        format!("{dst_token:#x}"),
        Decimal::from_str(&amount.to_string()).map_err(|e| malformed(e.to_string()))?,
        Decimal::from_str(&min_return.to_string()).map_err(|e| malformed(e.to_string()))?,
        msg.hash.clone(),
        chrono::Utc::now().timestamp(),
        Chain::Evm,
    )
    .map_err(|e| malformed(e.to_string()))?;

    Ok(Some(event))
}

/// Confirmed-log variant: `Swap(address,address,int256,int256,uint160,uint128,int24)`,
/// kept only if `sender` or `recipient` (the indexed topics) is in the watched set.
pub fn decode_swap_log(msg: &SwapLogMessage, watched: &HashSet<String>) -> Result<Option<TradeEvent>, DecodeError> {
    let malformed = |reason: String| DecodeError::Malformed { tx_hash: msg.tx_hash.clone(), reason };

    let Some(topic0_hex) = msg.topics.first() else { return Ok(None) };
    let topic0 = hex_decode(topic0_hex).map_err(malformed)?;
    if topic0 != swap_topic0() {
        return Ok(None);
    }

    let (Some(sender_topic), Some(recipient_topic)) = (msg.topics.get(1), msg.topics.get(2)) else {
        return Err(malformed("missing indexed sender/recipient topics".into()));
    };
    let sender = Address::from_str(sender_topic).map_err(|e| malformed(e.to_string()))?;
    let recipient = Address::from_str(recipient_topic).map_err(|e| malformed(e.to_string()))?;

    let sender_hex = format!("{sender:#x}").to_lowercase();
    let recipient_hex = format!("{recipient:#x}").to_lowercase();
    if !watched.contains(&sender_hex) && !watched.contains(&recipient_hex) {
        return Ok(None);
    }

    let data = hex_decode(&msg.data).map_err(malformed)?;
    let tokens = decode(
        &[ParamType::Int(256), ParamType::Int(256), ParamType::Uint(160), ParamType::Uint(128), ParamType::Int(24)],
        &data,
    )
    .map_err(|e| malformed(e.to_string()))?;
    let [Token::Int(amount0), Token::Int(amount1), ..] = tokens.as_slice() else {
        return Err(malformed("unexpected Swap log data shape".into()));
    };

    // A negative signed (two's complement) amount means the pool paid it out; that
    // side is token_out. `ethabi::Int` is a bare U256 holding the two's-complement
    // bit pattern, so recovering the magnitude of a negative value means negating it.
    fn magnitude(raw: &ethers::types::U256) -> Result<Decimal, String> {
        let abs = if raw.bit(255) {
            (!*raw).overflowing_add(ethers::types::U256::one()).0
        } else {
            *raw
        };
        Decimal::from_str(&abs.to_string()).map_err(|e| e.to_string())
    }

    let amount0_negative = amount0.bit(255);
    let (token_in, token_out, amount_in_raw, amount_out_raw) = if amount0_negative {
        (&msg.token1, &msg.token0, amount1, amount0)
    } else {
        (&msg.token0, &msg.token1, amount0, amount1)
    };

    let amount_in = magnitude(amount_in_raw).map_err(malformed)?;
    let amount_out_min = magnitude(amount_out_raw).map_err(malformed)?;

    let event = TradeEvent::new(
        sender_hex,
        token_in.clone(),
        token_out.clone(),
        amount_in,
        amount_out_min,
        msg.tx_hash.clone(),
        chrono::Utc::now().timestamp(),
        Chain::Evm,
    )
    .map_err(|e| malformed(e.to_string()))?;

    Ok(Some(event))
}

/// Which decoder(s) a pending-tx/log message should be tried against, per the
/// configured `EVM_INGESTION_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionMode {
    Pending,
    Logs,
    Both,
}

/// A websocket subscriber against one EVM node, decoding pending transactions
/// and/or confirmed `Swap` logs (per `mode`) and enqueueing resulting `TradeEvent`s.
pub struct EvmFeedSource {
    pub ws_url: String,
    pub routers: Vec<(Address, &'static str)>,
    pub mode: IngestionMode,
}

#[async_trait::async_trait]
impl crate::feed::FeedSource for EvmFeedSource {
    fn name(&self) -> &str {
        "evm"
    }

    async fn run(
        &self,
        bus: std::sync::Arc<crate::event_bus::EventBus>,
        watched: std::sync::Arc<HashSet<String>>,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let ws_url = self.ws_url.clone();
        let routers = self.routers.clone();
        let mode = self.mode;

        crate::feed::run_with_backoff("evm", shutdown, move || {
            let ws_url = ws_url.clone();
            let routers = routers.clone();
            let bus = bus.clone();
            let watched = watched.clone();
            async move { stream_evm_feed(&ws_url, &routers, mode, &bus, &watched).await }
        })
        .await;
    }
}

async fn stream_evm_feed(
    ws_url: &str,
    routers: &[(Address, &'static str)],
    mode: IngestionMode,
    bus: &crate::event_bus::EventBus,
    watched: &HashSet<String>,
) -> anyhow::Result<()> {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
    let (_write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        let Message::Text(text) = msg? else { continue };

        let event = if matches!(mode, IngestionMode::Pending | IngestionMode::Both) {
            if let Ok(pending) = serde_json::from_str::<PendingTxMessage>(&text) {
                routers
                    .iter()
                    .find_map(|(router, kind)| {
                        let decoded = match *kind {
                            "v2" => decode_router_v2(&pending, *router, watched),
                            "v3" => decode_router_v3(&pending, *router, watched),
                            "1inch" => decode_router_1inch(&pending, *router, watched),
                            _ => Ok(None),
                        };
                        match decoded {
                            Ok(Some(event)) => Some(event),
                            Ok(None) => None,
                            Err(e) => {
                                warn!(error = %e, "dropping malformed pending-tx payload");
                                None
                            }
                        }
                    })
            } else {
                None
            }
        } else {
            None
        };

        let event = event.or_else(|| {
            if matches!(mode, IngestionMode::Logs | IngestionMode::Both) {
                serde_json::from_str::<SwapLogMessage>(&text).ok().and_then(|log| match decode_swap_log(&log, watched) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed swap-log payload");
                        None
                    }
                })
            } else {
                None
            }
        });

        if let Some(event) = event {
            bus.push(event).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ethers::abi::encode;
    use ethers::types::U256;
    use rust_decimal_macros::dec;

    use super::*;

    fn router() -> Address {
        "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D".parse().unwrap()
    }

    fn watched(addr: &str) -> HashSet<String> {
        let mut set = HashSet::new();
        set.insert(addr.to_lowercase());
        set
    }

    fn token_in() -> Address {
        "0x11111111111111111111111111111111111111aa".parse().unwrap()
    }

    fn token_out() -> Address {
        "0x22222222222222222222222222222222222222bb".parse().unwrap()
    }

    fn leader() -> &'static str {
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
    }

    #[test]
    fn unrecognized_router_is_not_an_error() {
        let msg = PendingTxMessage {
            to: "0x0000000000000000000000000000000000dEaD".into(),
            input: "0xdeadbeef".into(),
            from: "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".into(),
            hash: "0xabc".into(),
        };
        let result = decode_router_v2(&msg, router(), &watched("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn unwatched_sender_is_filtered_out() {
        let msg = PendingTxMessage {
            to: format!("{:#x}", router()),
            input: "0x".to_string() + &hex::encode(selector_of("swapExactTokensForTokens(uint256,uint256,address[],address,uint256)")),
            from: "0x0000000000000000000000000000000000bEEF".into(),
            hash: "0xabc".into(),
        };
        let result = decode_router_v2(&msg, router(), &watched("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn unrecognized_swap_log_topic_is_not_an_error() {
        let msg = SwapLogMessage {
            topics: vec!["0x".to_string() + &hex::encode([0u8; 32])],
            data: "0x".into(),
            token0: "0xtoken0".into(),
            token1: "0xtoken1".into(),
            tx_hash: "0xabc".into(),
        };
        let result = decode_swap_log(&msg, &HashSet::new());
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn decode_router_v2_extracts_path_endpoints_and_amounts() {
        let calldata = [
            selector_of("swapExactTokensForTokens(uint256,uint256,address[],address,uint256)").to_vec(),
            encode(&[
                Token::Uint(U256::from(1_000u64)),
                Token::Uint(U256::from(990u64)),
                Token::Array(vec![Token::Address(token_in()), Token::Address(token_out())]),
                Token::Address(router()),
                Token::Uint(U256::from(9_999_999_999u64)),
            ]),
        ]
        .concat();
        let msg = PendingTxMessage {
            to: format!("{:#x}", router()),
            input: format!("0x{}", hex::encode(calldata)),
            from: leader().into(),
            hash: "0xabc".into(),
        };

        let event = decode_router_v2(&msg, router(), &watched(leader())).unwrap().unwrap();
        assert_eq!(event.wallet, leader());
        assert_eq!(event.token_in, format!("{:#x}", token_in()));
        assert_eq!(event.token_out, format!("{:#x}", token_out()));
        assert_eq!(event.amount_in, dec!(1_000));
        assert_eq!(event.amount_out_min, dec!(990));
    }

    #[test]
    fn decode_router_v3_unpacks_path_endpoints_from_packed_bytes() {
        let mut path = Vec::new();
        path.extend_from_slice(token_in().as_bytes());
        path.extend_from_slice(&[0x00, 0x0b, 0xb8]); // 3000 (0.3%) fee tier
        path.extend_from_slice(token_out().as_bytes());

        let calldata = [
            selector_of("exactInput((bytes,address,uint256,uint256,uint256))").to_vec(),
            encode(&[Token::Tuple(vec![
                Token::Bytes(path),
                Token::Address(router()),
                Token::Uint(U256::from(9_999_999_999u64)),
                Token::Uint(U256::from(5_000u64)),
                Token::Uint(U256::from(4_950u64)),
            ])]),
        ]
        .concat();
        let msg = PendingTxMessage {
            to: format!("{:#x}", router()),
            input: format!("0x{}", hex::encode(calldata)),
            from: leader().into(),
            hash: "0xdef".into(),
        };

        let event = decode_router_v3(&msg, router(), &watched(leader())).unwrap().unwrap();
        assert_eq!(event.token_in, format!("{:#x}", token_in()));
        assert_eq!(event.token_out, format!("{:#x}", token_out()));
        assert_eq!(event.amount_in, dec!(5_000));
        assert_eq!(event.amount_out_min, dec!(4_950));
    }

    #[test]
    fn decode_router_1inch_extracts_swap_description_fields() {
        let calldata = [
            selector_of("swap(address,(address,address,address,address,uint256,uint256,uint256),bytes,bytes)").to_vec(),
            encode(&[
                Token::Address(router()), // aggregation executor, unused
                Token::Tuple(vec![
                    Token::Address(token_in()),
                    Token::Address(token_out()),
                    Token::Address(leader().parse().unwrap()),
                    Token::Address(leader().parse().unwrap()),
                    Token::Uint(U256::from(2_000u64)),
                    Token::Uint(U256::from(1_980u64)),
                    Token::Uint(U256::zero()),
                ]),
                Token::Bytes(vec![]),
                Token::Bytes(vec![]),
            ]),
        ]
        .concat();
        let msg = PendingTxMessage {
            to: format!("{:#x}", router()),
            input: format!("0x{}", hex::encode(calldata)),
            from: leader().into(),
            hash: "0xghi".into(),
        };

        let event = decode_router_1inch(&msg, router(), &watched(leader())).unwrap().unwrap();
        assert_eq!(event.token_in, format!("{:#x}", token_in()));
        assert_eq!(event.token_out, format!("{:#x}", token_out()));
        assert_eq!(event.amount_in, dec!(2_000));
        assert_eq!(event.amount_out_min, dec!(1_980));
    }

    fn negative_two_complement(magnitude: u64) -> U256 {
        (!U256::from(magnitude)).overflowing_add(U256::one()).0
    }

    #[test]
    fn decode_swap_log_attributes_token_out_to_the_negative_amount_when_amount0_is_negative() {
        let data = encode(&[
            Token::Int(negative_two_complement(100)),
            Token::Int(U256::from(50u64)),
            Token::Uint(U256::from(1u64)),
            Token::Uint(U256::from(1u64)),
            Token::Int(U256::from(42u64)),
        ]);
        let msg = SwapLogMessage {
            topics: vec![
                format!("0x{}", hex::encode(swap_topic0())),
                leader().to_string(),
                format!("{:#x}", router()),
            ],
            data: format!("0x{}", hex::encode(data)),
            token0: "0xTOKENA".into(),
            token1: "0xTOKENB".into(),
            tx_hash: "0xjkl".into(),
        };

        let event = decode_swap_log(&msg, &watched(leader())).unwrap().unwrap();
        assert_eq!(event.token_in, "0xTOKENB");
        assert_eq!(event.token_out, "0xTOKENA");
        assert_eq!(event.amount_in, dec!(50));
        assert_eq!(event.amount_out_min, dec!(100));
    }

    #[test]
    fn decode_swap_log_attributes_token_out_to_the_negative_amount_when_amount1_is_negative() {
        let data = encode(&[
            Token::Int(U256::from(200u64)),
            Token::Int(negative_two_complement(80)),
            Token::Uint(U256::from(1u64)),
            Token::Uint(U256::from(1u64)),
            Token::Int(U256::from(42u64)),
        ]);
        let msg = SwapLogMessage {
            topics: vec![
                format!("0x{}", hex::encode(swap_topic0())),
                leader().to_string(),
                format!("{:#x}", router()),
            ],
            data: format!("0x{}", hex::encode(data)),
            token0: "0xTOKENA".into(),
            token1: "0xTOKENB".into(),
            tx_hash: "0xmno".into(),
        };

        let event = decode_swap_log(&msg, &watched(leader())).unwrap().unwrap();
        assert_eq!(event.token_in, "0xTOKENA");
        assert_eq!(event.token_out, "0xTOKENB");
        assert_eq!(event.amount_in, dec!(200));
        assert_eq!(event.amount_out_min, dec!(80));
    }
}
