//! In-process paper venue
//!
//! Speaks the venue's JSON protocol over in-memory channels, so the connector,
//! executor and sessions run unchanged against it. Ticks are generated on a
//! timer or injected; digit contracts settle on the N-th tick after purchase.

use crate::config::PaperConfig;
use crate::protocol;
use crate::signal::{ContractType, TickSample};
use crate::ws::{lock, ConnectorError, Dialer, WsConnection};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const HISTORY_LIMIT: usize = 5_000;
/// Ticks generated per symbol at startup when the ticker is enabled
const SEED_HISTORY: usize = 500;
const LOGIN_ID: &str = "VRTC0000001";
const MAX_STEP_UNITS: i64 = 60;

type Rejection = (&'static str, String);

fn num(value: Decimal) -> Value {
    json!(value.to_f64().unwrap_or_default())
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    serde_json::from_value(value.clone()).ok()
}

#[derive(Debug, Clone)]
enum VenueEvent {
    Tick(TickSample),
    Contract(u64),
    Balance,
}

#[derive(Debug, Clone)]
struct PaperContract {
    id: u64,
    symbol: String,
    contract_type: ContractType,
    barrier: Option<u8>,
    buy_price: Decimal,
    payout: Decimal,
    duration: u32,
    ticks_seen: u32,
    entry_tick: Option<Decimal>,
    exit_tick: Option<Decimal>,
    sold: bool,
    won: bool,
    purchase_time: i64,
    sell_time: Option<i64>,
}

impl PaperContract {
    /// Fold one tick in; true when this tick settles the contract
    fn observe(&mut self, tick: &TickSample) -> bool {
        if self.sold {
            return false;
        }
        if self.entry_tick.is_none() {
            self.entry_tick = Some(tick.quote);
        }
        self.ticks_seen += 1;
        if self.ticks_seen < self.duration {
            return false;
        }
        self.sold = true;
        self.exit_tick = Some(tick.quote);
        self.sell_time = Some(tick.epoch);
        self.won = self.contract_type.wins(tick.digit, self.barrier);
        true
    }

    fn profit(&self) -> Decimal {
        match (self.sold, self.won) {
            (false, _) => Decimal::ZERO,
            (true, true) => self.payout - self.buy_price,
            (true, false) => -self.buy_price,
        }
    }

    fn to_json(&self) -> Value {
        let status = match (self.sold, self.won) {
            (false, _) => "open",
            (true, true) => "won",
            (true, false) => "lost",
        };
        json!({
            "contract_id": self.id,
            "underlying": self.symbol,
            "contract_type": self.contract_type.code(),
            "barrier": self.barrier.map(|b| b.to_string()),
            "buy_price": num(self.buy_price),
            "payout": num(self.payout),
            "profit": num(self.profit()),
            "status": status,
            "is_sold": u8::from(self.sold),
            "entry_tick": self.entry_tick.map(num),
            "exit_tick": self.exit_tick.map(num),
            "purchase_time": self.purchase_time,
            "sell_time": self.sell_time,
        })
    }
}

#[derive(Debug, Clone)]
struct Proposal {
    symbol: String,
    contract_type: ContractType,
    barrier: Option<u8>,
    stake: Decimal,
    payout: Decimal,
    duration: u32,
}

#[derive(Debug)]
struct Market {
    /// Latest price as an integer count of pips
    units: i64,
    history: VecDeque<TickSample>,
}

struct VenueState {
    balance: Decimal,
    epoch: i64,
    markets: HashMap<String, Market>,
    proposals: HashMap<String, Proposal>,
    contracts: HashMap<u64, PaperContract>,
    faults: HashMap<String, (String, String)>,
    rng: StdRng,
}

struct Shared {
    config: PaperConfig,
    state: Mutex<VenueState>,
    events: broadcast::Sender<VenueEvent>,
    kill: watch::Sender<u64>,
    silent: AtomicBool,
    refuse: AtomicBool,
    next_id: AtomicU64,
    connections: AtomicUsize,
}

/// What a connection's subscription streams
#[derive(Debug, Clone, PartialEq)]
enum Stream {
    Ticks(String),
    Contract(u64),
    Balance,
}

impl Stream {
    fn kind(&self) -> &'static str {
        match self {
            Stream::Ticks(_) => "ticks",
            Stream::Contract(_) => "proposal_open_contract",
            Stream::Balance => "balance",
        }
    }
}

/// Per-connection subscription table
#[derive(Default)]
struct Connection {
    streams: HashMap<String, Stream>,
}

/// Simulated venue; cheap to clone
#[derive(Clone)]
pub struct PaperVenue {
    shared: Arc<Shared>,
}

impl PaperVenue {
    pub fn new(config: PaperConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let markets = config
            .symbols
            .iter()
            .map(|symbol| {
                let market = Market {
                    units: rng.gen_range(100_000..1_000_000),
                    history: VecDeque::new(),
                };
                (symbol.clone(), market)
            })
            .collect();
        let (events, _) = broadcast::channel(1024);
        let (kill, _) = watch::channel(0);

        let venue = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(VenueState {
                    balance: config.initial_balance,
                    epoch: chrono::Utc::now().timestamp(),
                    markets,
                    proposals: HashMap::new(),
                    contracts: HashMap::new(),
                    faults: HashMap::new(),
                    rng,
                }),
                config,
                events,
                kill,
                silent: AtomicBool::new(false),
                refuse: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                connections: AtomicUsize::new(0),
            }),
        };

        if venue.shared.config.tick_interval().is_some() {
            for symbol in venue.shared.config.symbols.clone() {
                for _ in 0..SEED_HISTORY {
                    venue.step(&symbol);
                }
            }
        }
        venue
    }

    pub fn balance(&self) -> Decimal {
        lock(&self.shared.state).balance
    }

    pub fn open_contracts(&self) -> usize {
        lock(&self.shared.state)
            .contracts
            .values()
            .filter(|c| !c.sold)
            .count()
    }

    /// Live connections being served
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Generate ticks on the configured cadence; `None` when disabled
    pub fn spawn_ticker(&self) -> Option<JoinHandle<()>> {
        let every = self.shared.config.tick_interval()?;
        let venue = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                for symbol in &venue.shared.config.symbols {
                    venue.step(symbol);
                }
            }
        }))
    }

    /// Random-walk one symbol by a tick
    pub fn step(&self, symbol: &str) -> Option<TickSample> {
        self.publish(symbol, |rng, units| {
            (units + rng.gen_range(-MAX_STEP_UNITS..=MAX_STEP_UNITS)).max(100)
        })
    }

    /// Inject a tick at `quote`
    pub fn push_tick(&self, symbol: &str, quote: Decimal) -> Option<TickSample> {
        let mut fixed = quote.round_dp(self.shared.config.pip_size);
        fixed.rescale(self.shared.config.pip_size);
        let units = fixed.mantissa().to_i64()?;
        self.publish(symbol, move |_, _| units)
    }

    /// Inject a tick whose last digit is `digit`
    pub fn push_digit(&self, symbol: &str, digit: u8) -> Option<TickSample> {
        let digit = i64::from(digit % 10);
        self.publish(symbol, move |_, units| units - units.rem_euclid(10) + digit)
    }

    /// Close every served connection
    pub fn drop_connections(&self) {
        self.shared.kill.send_modify(|generation| *generation += 1);
    }

    /// Answer the next request of `kind` with an error
    pub fn fail_next(&self, kind: &str, code: &str, message: &str) {
        lock(&self.shared.state)
            .faults
            .insert(kind.to_string(), (code.to_string(), message.to_string()));
    }

    /// Stop answering and pushing while keeping sockets open
    pub fn set_silent(&self, silent: bool) {
        self.shared.silent.store(silent, Ordering::SeqCst);
    }

    /// Refuse new connections
    pub fn set_refusing(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    fn publish(
        &self,
        symbol: &str,
        next_units: impl FnOnce(&mut StdRng, i64) -> i64,
    ) -> Option<TickSample> {
        let pip_size = self.shared.config.pip_size;
        let (sample, settled, credited) = {
            let mut guard = lock(&self.shared.state);
            let state = &mut *guard;
            state.epoch += 1;
            let market = state.markets.get_mut(symbol)?;
            market.units = next_units(&mut state.rng, market.units);

            let sample = TickSample::new(
                symbol,
                Decimal::new(market.units, pip_size),
                state.epoch,
                pip_size,
            );
            market.history.push_back(sample.clone());
            if market.history.len() > HISTORY_LIMIT {
                market.history.pop_front();
            }

            let mut settled = Vec::new();
            let mut credit = Decimal::ZERO;
            for contract in state.contracts.values_mut().filter(|c| c.symbol == symbol) {
                if contract.observe(&sample) {
                    settled.push(contract.id);
                    if contract.won {
                        credit += contract.payout;
                    }
                }
            }
            state.balance += credit;
            (sample, settled, credit > Decimal::ZERO)
        };

        let _ = self.shared.events.send(VenueEvent::Tick(sample.clone()));
        for id in settled {
            let _ = self.shared.events.send(VenueEvent::Contract(id));
        }
        if credited {
            let _ = self.shared.events.send(VenueEvent::Balance);
        }
        Some(sample)
    }

    /// Serve one connection until either side closes
    ///
    /// `inbound` carries client frames; replies and pushes go to `outbound`.
    pub async fn serve(
        &self,
        mut inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    ) {
        self.shared.connections.fetch_add(1, Ordering::SeqCst);
        let mut events = self.shared.events.subscribe();
        let mut kill = self.shared.kill.subscribe();
        let mut connection = Connection::default();
        tracing::debug!("Paper venue connection opened");

        loop {
            tokio::select! {
                _ = kill.changed() => break,

                frame = inbound.recv() => {
                    let Some(text) = frame else { break };
                    if self.shared.silent.load(Ordering::SeqCst) {
                        continue;
                    }
                    let reply = self.handle(&mut connection, &text);
                    if outbound.send(reply.to_string()).is_err() {
                        break;
                    }
                }

                event = events.recv() => match event {
                    Ok(event) => {
                        if self.shared.silent.load(Ordering::SeqCst) {
                            continue;
                        }
                        let pushes = self.pushes(&mut connection, &event);
                        if pushes.into_iter().any(|push| outbound.send(push.to_string()).is_err()) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Paper venue connection lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.shared.connections.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!("Paper venue connection closed");
    }

    fn handle(&self, connection: &mut Connection, text: &str) -> Value {
        let request: Value = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => {
                return json!({
                    "msg_type": "error",
                    "error": {"code": "InputValidationFailed", "message": e.to_string()}
                })
            }
        };
        let kind = request
            .as_object()
            .map(protocol::request_kind)
            .unwrap_or("other");

        let fault = lock(&self.shared.state).faults.remove(kind);
        let outcome = match fault {
            Some((code, message)) => Err((code, message)),
            None => self
                .answer(connection, kind, &request)
                .map_err(|(code, message)| (code.to_string(), message)),
        };

        let msg_type = match kind {
            "ticks" => "tick",
            "ticks_history" => "history",
            other => other,
        };
        let mut reply = Map::new();
        reply.insert("echo_req".into(), request.clone());
        reply.insert("msg_type".into(), Value::from(msg_type));
        if let Some(req_id) = request.get("req_id") {
            reply.insert("req_id".into(), req_id.clone());
        }
        match outcome {
            Ok(Value::Object(fields)) => reply.extend(fields),
            Ok(_) => {}
            Err((code, message)) => {
                tracing::debug!(kind, %code, "Paper venue rejected request");
                reply.insert("error".into(), json!({"code": code, "message": message}));
            }
        }
        Value::Object(reply)
    }

    fn open_stream(&self, connection: &mut Connection, request: &Value, stream: Stream) -> Option<Value> {
        if request.get("subscribe").and_then(Value::as_u64) != Some(1) {
            return None;
        }
        let id = format!("paper-{}", self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        connection.streams.insert(id.clone(), stream);
        Some(json!({ "id": id }))
    }

    fn answer(
        &self,
        connection: &mut Connection,
        kind: &str,
        request: &Value,
    ) -> Result<Value, Rejection> {
        match kind {
            "ping" => Ok(json!({"ping": "pong"})),
            "authorize" => self.authorize(request),
            "balance" => {
                let mut reply = json!({"balance": self.balance_json()});
                if let Some(subscription) = self.open_stream(connection, request, Stream::Balance) {
                    reply["subscription"] = subscription;
                }
                Ok(reply)
            }
            "ticks" => self.ticks(connection, request),
            "ticks_history" => self.history(request),
            "active_symbols" => Ok(self.active_symbols()),
            "contracts_for" => self.contracts_for(request),
            "proposal" => self.proposal(request),
            "buy" => self.buy(request),
            "proposal_open_contract" => self.open_contract(connection, request),
            "forget" => {
                let id = request["forget"].as_str().unwrap_or_default();
                let removed = connection.streams.remove(id).is_some();
                Ok(json!({"forget": u8::from(removed)}))
            }
            "forget_all" => {
                let kinds: Vec<String> = match &request["forget_all"] {
                    Value::String(kind) => vec![kind.clone()],
                    Value::Array(kinds) => kinds
                        .iter()
                        .filter_map(|k| k.as_str().map(str::to_string))
                        .collect(),
                    _ => Vec::new(),
                };
                let ids: Vec<String> = connection
                    .streams
                    .iter()
                    .filter(|(_, stream)| kinds.iter().any(|k| k == stream.kind()))
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &ids {
                    connection.streams.remove(id);
                }
                Ok(json!({"forget_all": ids}))
            }
            _ => Err(("UnrecognisedRequest", "Unrecognised request".into())),
        }
    }

    fn authorize(&self, request: &Value) -> Result<Value, Rejection> {
        let token = request["authorize"].as_str().unwrap_or_default();
        if token.trim().is_empty() {
            return Err(("InvalidToken", "The token is invalid.".into()));
        }
        let state = lock(&self.shared.state);
        Ok(json!({
            "authorize": {
                "loginid": LOGIN_ID,
                "currency": self.shared.config.currency,
                "balance": num(state.balance),
                "is_virtual": 1,
            }
        }))
    }

    fn balance_json(&self) -> Value {
        json!({
            "balance": num(self.balance()),
            "currency": self.shared.config.currency,
            "loginid": LOGIN_ID,
        })
    }

    fn known_symbol<'a>(&self, request: &'a Value, field: &str) -> Result<&'a str, Rejection> {
        let symbol = request[field].as_str().unwrap_or_default();
        if lock(&self.shared.state).markets.contains_key(symbol) {
            Ok(symbol)
        } else {
            Err(("InvalidSymbol", format!("Symbol {symbol} is invalid.")))
        }
    }

    fn ticks(&self, connection: &mut Connection, request: &Value) -> Result<Value, Rejection> {
        let symbol = self.known_symbol(request, "ticks")?;
        let pip_size = self.shared.config.pip_size;
        let latest = {
            let state = lock(&self.shared.state);
            let market = &state.markets[symbol];
            market.history.back().cloned().unwrap_or_else(|| {
                TickSample::new(symbol, Decimal::new(market.units, pip_size), state.epoch, pip_size)
            })
        };
        let mut reply = json!({"tick": tick_json(&latest)});
        if let Some(subscription) =
            self.open_stream(connection, request, Stream::Ticks(symbol.to_string()))
        {
            reply["subscription"] = subscription;
        }
        Ok(reply)
    }

    fn history(&self, request: &Value) -> Result<Value, Rejection> {
        let symbol = self.known_symbol(request, "ticks_history")?;
        let count = request["count"].as_u64().unwrap_or(1_000).min(HISTORY_LIMIT as u64) as usize;
        let state = lock(&self.shared.state);
        let history = &state.markets[symbol].history;
        let skip = history.len().saturating_sub(count);
        let (prices, times): (Vec<Value>, Vec<Value>) = history
            .iter()
            .skip(skip)
            .map(|t| (num(t.quote), Value::from(t.epoch)))
            .unzip();
        Ok(json!({
            "history": {"prices": prices, "times": times},
            "pip_size": self.shared.config.pip_size,
        }))
    }

    fn active_symbols(&self) -> Value {
        let symbols: Vec<Value> = self
            .shared
            .config
            .symbols
            .iter()
            .map(|symbol| {
                json!({
                    "symbol": symbol,
                    "display_name": format!("Paper {symbol}"),
                    "market": "synthetic_index",
                    "submarket": "random_index",
                    "exchange_is_open": 1,
                })
            })
            .collect();
        json!({ "active_symbols": symbols })
    }

    fn contracts_for(&self, request: &Value) -> Result<Value, Rejection> {
        let symbol = self.known_symbol(request, "contracts_for")?;
        let available: Vec<Value> = [
            (ContractType::DigitEven, "evenodd"),
            (ContractType::DigitOdd, "evenodd"),
            (ContractType::DigitOver, "overunder"),
            (ContractType::DigitUnder, "overunder"),
            (ContractType::DigitDiff, "digits"),
        ]
        .into_iter()
        .map(|(contract_type, category)| {
            json!({
                "contract_type": contract_type.code(),
                "contract_category": category,
                "min_contract_duration": "1t",
                "max_contract_duration": "10t",
            })
        })
        .collect();
        Ok(json!({
            "contracts_for": {"available": available, "underlying_symbol": symbol}
        }))
    }

    fn proposal(&self, request: &Value) -> Result<Value, Rejection> {
        let symbol = self.known_symbol(request, "symbol")?;
        let stake = decimal_of(&request["amount"])
            .filter(|a| *a > Decimal::ZERO)
            .ok_or(("InvalidAmount", "Amount must be a positive number.".to_string()))?;
        let contract_type: ContractType = request["contract_type"]
            .as_str()
            .unwrap_or_default()
            .parse()
            .map_err(|e: String| ("InvalidContractType", e))?;
        let barrier = match &request["barrier"] {
            Value::String(s) => s.parse::<u8>().ok(),
            Value::Number(n) => n.as_u64().and_then(|b| u8::try_from(b).ok()),
            _ => None,
        };
        let barrier = match (contract_type.needs_barrier(), barrier) {
            (true, Some(b)) if b <= 9 => Some(b),
            (true, _) => return Err(("InvalidBarrier", "Barrier must be a digit.".into())),
            (false, _) => None,
        };
        let duration = request["duration"].as_u64().unwrap_or(0);
        if !(1..=10).contains(&duration) {
            return Err(("InvalidDuration", "Duration must be 1 to 10 ticks.".into()));
        }

        let winning = contract_type.winning_digits(barrier);
        if winning == 0 || winning == 10 {
            return Err((
                "ContractBuyValidationError",
                "Barrier leaves no possible payout.".into(),
            ));
        }
        let payout = (stake * Decimal::TEN / Decimal::from(winning as u64)
            * (Decimal::ONE - self.shared.config.payout_margin))
            .round_dp(2);

        let id = uuid::Uuid::new_v4().to_string();
        let mut guard = lock(&self.shared.state);
        let spot = Decimal::new(guard.markets[symbol].units, self.shared.config.pip_size);
        let spot_time = guard.epoch;
        guard.proposals.insert(
            id.clone(),
            Proposal {
                symbol: symbol.to_string(),
                contract_type,
                barrier,
                stake,
                payout,
                duration: duration as u32,
            },
        );
        Ok(json!({
            "proposal": {
                "id": id,
                "ask_price": num(stake),
                "payout": num(payout),
                "spot": num(spot),
                "spot_time": spot_time,
                "longcode": format!("Win payout if the last digit of {symbol} satisfies {contract_type} after {duration} ticks."),
            }
        }))
    }

    fn buy(&self, request: &Value) -> Result<Value, Rejection> {
        let proposal_id = request["buy"].as_str().unwrap_or_default();
        let price = decimal_of(&request["price"]).unwrap_or_default();

        let reply = {
            let mut guard = lock(&self.shared.state);
            let state = &mut *guard;
            let proposal = state.proposals.remove(proposal_id).ok_or((
                "InvalidContractProposal",
                "Proposal not found or expired.".to_string(),
            ))?;
            if price < proposal.stake {
                return Err((
                    "PriceMoved",
                    format!("Ask {} is above your price {price}.", proposal.stake),
                ));
            }
            if state.balance < proposal.stake {
                return Err(("InsufficientBalance", "Insufficient balance.".into()));
            }

            state.balance -= proposal.stake;
            let contract_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            let contract = PaperContract {
                id: contract_id,
                symbol: proposal.symbol,
                contract_type: proposal.contract_type,
                barrier: proposal.barrier,
                buy_price: proposal.stake,
                payout: proposal.payout,
                duration: proposal.duration,
                ticks_seen: 0,
                entry_tick: None,
                exit_tick: None,
                sold: false,
                won: false,
                purchase_time: state.epoch,
                sell_time: None,
            };
            let reply = json!({
                "buy": {
                    "contract_id": contract_id,
                    "transaction_id": contract_id + 1_000_000,
                    "buy_price": num(contract.buy_price),
                    "payout": num(contract.payout),
                    "start_time": state.epoch,
                    "balance_after": num(state.balance),
                    "longcode": format!("{} on {}", contract.contract_type, contract.symbol),
                }
            });
            state.contracts.insert(contract_id, contract);
            reply
        };

        let _ = self.shared.events.send(VenueEvent::Balance);
        Ok(reply)
    }

    fn open_contract(&self, connection: &mut Connection, request: &Value) -> Result<Value, Rejection> {
        let contract_id = request["contract_id"].as_u64().unwrap_or_default();
        let contract = lock(&self.shared.state)
            .contracts
            .get(&contract_id)
            .cloned()
            .ok_or(("InvalidContractId", format!("Contract {contract_id} not found.")))?;

        let mut reply = json!({"proposal_open_contract": contract.to_json()});
        if !contract.sold {
            if let Some(subscription) =
                self.open_stream(connection, request, Stream::Contract(contract_id))
            {
                reply["subscription"] = subscription;
            }
        }
        Ok(reply)
    }

    fn pushes(&self, connection: &mut Connection, event: &VenueEvent) -> Vec<Value> {
        match event {
            VenueEvent::Tick(tick) => connection
                .streams
                .iter()
                .filter(|(_, stream)| matches!(stream, Stream::Ticks(s) if *s == tick.symbol))
                .map(|(id, _)| {
                    json!({"msg_type": "tick", "tick": tick_json(tick), "subscription": {"id": id}})
                })
                .collect(),

            VenueEvent::Contract(contract_id) => {
                let ids: Vec<String> = connection
                    .streams
                    .iter()
                    .filter(|(_, stream)| **stream == Stream::Contract(*contract_id))
                    .map(|(id, _)| id.clone())
                    .collect();
                if ids.is_empty() {
                    return Vec::new();
                }
                let Some(contract) = lock(&self.shared.state).contracts.get(contract_id).cloned()
                else {
                    return Vec::new();
                };
                ids.into_iter()
                    .map(|id| {
                        if contract.sold {
                            connection.streams.remove(&id);
                        }
                        json!({
                            "msg_type": "proposal_open_contract",
                            "proposal_open_contract": contract.to_json(),
                            "subscription": {"id": id},
                        })
                    })
                    .collect()
            }

            VenueEvent::Balance => {
                let balance = self.balance_json();
                connection
                    .streams
                    .iter()
                    .filter(|(_, stream)| **stream == Stream::Balance)
                    .map(|(id, _)| {
                        json!({"msg_type": "balance", "balance": balance, "subscription": {"id": id}})
                    })
                    .collect()
            }
        }
    }
}

fn tick_json(tick: &TickSample) -> Value {
    json!({
        "symbol": tick.symbol,
        "quote": num(tick.quote),
        "epoch": tick.epoch,
        "pip_size": tick.pip_size,
    })
}

#[async_trait]
impl Dialer for PaperVenue {
    async fn dial(&self, _url: &str) -> Result<WsConnection, ConnectorError> {
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(ConnectorError::Transport("paper venue refused connection".into()));
        }
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let venue = self.clone();
        tokio::spawn(async move { venue.serve(server_rx, server_tx).await });
        Ok(WsConnection {
            outbound: client_tx,
            inbound: client_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ContractRequest, ExecutionEngine, ExecutionError, TradeExecutor};
    use crate::protocol::{keys, requests};
    use crate::ws::{ConnectionEvent, Connector, ConnectorConfig};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn quiet_config() -> PaperConfig {
        PaperConfig {
            tick_interval_ms: 0,
            seed: Some(11),
            ..Default::default()
        }
    }

    async fn connect(venue: &PaperVenue) -> Connector {
        let config = ConnectorConfig::new("paper://")
            .api_token("paper-token")
            .request_timeout(Duration::from_secs(1))
            .ping_interval(Duration::from_secs(3600))
            .silence_window(Duration::from_secs(3600));
        let connector = Connector::with_dialer(config, Arc::new(venue.clone()));
        connector.connect().await.unwrap();
        connector
    }

    fn request(contract_type: ContractType, barrier: Option<u8>) -> ContractRequest {
        ContractRequest {
            symbol: "R_100".into(),
            contract_type,
            barrier,
            stake: dec!(1),
            currency: "USD".into(),
            duration_ticks: 1,
        }
    }

    async fn wait_for_subscription(connector: &Connector, key: &str) {
        while !connector.active_subscriptions().iter().any(|s| s.key == key) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_contract_settles_on_next_tick() {
        let venue = PaperVenue::new(quiet_config());
        let connector = connect(&venue).await;
        assert_eq!(connector.account().unwrap().balance, dec!(1000));
        let executor = TradeExecutor::new(connector.clone(), Duration::from_secs(1), Duration::from_secs(2));

        let quote = executor.request_quote(&request(ContractType::DigitEven, None)).await.unwrap();
        // Five winning digits: 1 / 0.5 × 0.95
        assert_eq!(quote.payout, dec!(1.90));
        let purchased = executor.purchase(&quote.id, quote.ask_price).await.unwrap();
        assert_eq!(venue.balance(), dec!(999));
        assert_eq!(venue.open_contracts(), 1);

        let monitor = tokio::spawn({
            let executor = executor.clone();
            async move { executor.monitor(purchased.contract_id, Duration::from_secs(2)).await }
        });
        wait_for_subscription(&connector, &keys::open_contract(purchased.contract_id)).await;
        venue.push_digit("R_100", 4).unwrap();

        let settlement = monitor.await.unwrap().unwrap();
        assert!(settlement.won);
        assert_eq!(settlement.profit, dec!(0.90));
        assert_eq!(venue.balance(), dec!(1000.90));
        assert_eq!(venue.open_contracts(), 0);
    }

    #[tokio::test]
    async fn test_losing_differs_contract() {
        let venue = PaperVenue::new(quiet_config());
        let connector = connect(&venue).await;
        let executor = TradeExecutor::new(connector, Duration::from_secs(1), Duration::from_secs(2));

        let contract = executor
            .open_contract(&request(ContractType::DigitDiff, Some(7)))
            .await
            .unwrap();
        // Settle before monitoring: the opening snapshot already carries the result
        venue.push_digit("R_100", 7).unwrap();
        let settlement = executor
            .monitor(contract.id.unwrap(), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!settlement.won);
        assert_eq!(settlement.profit, dec!(-1));
        assert_eq!(settlement.payout, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_injected_fault_and_validation() {
        let venue = PaperVenue::new(quiet_config());
        let connector = connect(&venue).await;
        let executor = TradeExecutor::new(connector.clone(), Duration::from_secs(1), Duration::from_secs(1));

        venue.fail_next("proposal", "MarketIsClosed", "This market is presently closed.");
        let err = executor
            .request_quote(&request(ContractType::DigitOdd, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Connector(ConnectorError::Protocol { ref code, .. }) if code == "MarketIsClosed"
        ));

        // Over 9 can never win
        let err = executor
            .request_quote(&request(ContractType::DigitOver, Some(9)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ContractBuyValidationError"));

        let err = executor.purchase("nope", dec!(1)).await.unwrap_err();
        assert!(err.to_string().contains("InvalidContractProposal"));
    }

    #[tokio::test]
    async fn test_tick_stream_and_history() {
        let venue = PaperVenue::new(quiet_config());
        let connector = connect(&venue).await;
        for digit in [1, 2, 3] {
            venue.push_digit("R_10", digit).unwrap();
        }

        let history = connector
            .request(requests::ticks_history("R_10", 2))
            .await
            .unwrap();
        let ticks = TickSample::from_history(&history, "R_10").unwrap();
        assert_eq!(ticks.iter().map(|t| t.digit).collect::<Vec<_>>(), vec![2, 3]);

        let mut stream = connector
            .subscribe(&keys::ticks("R_10"), requests::ticks("R_10"))
            .await
            .unwrap();
        let opening = TickSample::from_message(&stream.next().await.unwrap()).unwrap();
        assert_eq!(opening.digit, 3);

        venue.push_digit("R_10", 8).unwrap();
        venue.push_digit("R_50", 5).unwrap();
        let pushed = TickSample::from_message(&stream.next().await.unwrap()).unwrap();
        assert_eq!((pushed.symbol.as_str(), pushed.digit), ("R_10", 8));

        assert_eq!(connector.forget_all(&["ticks"]).await.unwrap(), 1);
        assert!(stream.next().await.is_none());

        let err = connector
            .subscribe(&keys::ticks("NOPE"), requests::ticks("NOPE"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Protocol { ref code, .. } if code == "InvalidSymbol"));
    }

    #[tokio::test]
    async fn test_drop_connections_notifies_connector() {
        let venue = PaperVenue::new(quiet_config());
        let connector = connect(&venue).await;
        let mut events = connector.events();
        assert_eq!(venue.connection_count(), 1);

        venue.set_refusing(true);
        venue.drop_connections();
        loop {
            if let ConnectionEvent::Disconnected { .. } = events.recv().await.unwrap() {
                break;
            }
        }
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_ticker_seeds_history() {
        let venue = PaperVenue::new(PaperConfig {
            tick_interval_ms: 1_000,
            seed: Some(3),
            ..Default::default()
        });
        let state = lock(&venue.shared.state);
        assert!(state.markets.values().all(|m| m.history.len() == SEED_HISTORY));
    }
}
