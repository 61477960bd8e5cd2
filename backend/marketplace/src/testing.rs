//! In-memory [`Platform`] used by the unit tests.
//!
//! Simulates the marketplace contracts closely enough to drive every facade
//! operation, plus a search index that trails writes by a configurable number
//! of queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;
use serde_json::{json, Map, Value};

use crate::codes::as_u64;
use crate::errors::{MarketError, Result};
use crate::models::Wei;
use crate::platform::{ContractRef, Credential, Platform, UploadedContract};
use crate::query::Query;

pub const ADMIN: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin-pass";
pub const FAUCET_ETHER: u64 = 1_000;

const ZERO: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub caller: String,
    pub contract: String,
    pub method: String,
    pub args: Value,
    pub value: Wei,
}

struct Row {
    table: String,
    data: Value,
    /// Queries left before the row becomes visible.
    pending: u32,
}

struct BidContract {
    id: u64,
    state: u64,
    escrow: u128,
}

#[derive(Default)]
struct Ledger {
    rows: Vec<Row>,
    next_address: u64,
    next_bid_id: u64,
    accounts: HashMap<String, (String, String)>,
    balances: HashMap<String, u128>,
    bids: HashMap<String, BidContract>,
    projects: Vec<String>,
    users: Vec<String>,
    compiled: Vec<String>,
    calls: Vec<RecordedCall>,
    admin_interface: String,
    user_manager: String,
    project_manager: String,
}

impl Ledger {
    fn address(&mut self) -> String {
        self.next_address += 1;
        format!("{:040x}", self.next_address)
    }

    fn rows_mut(&mut self, table: &str) -> impl Iterator<Item = &mut Value> + '_ {
        let table = table.to_string();
        self.rows
            .iter_mut()
            .filter(move |r| r.table == table)
            .map(|r| &mut r.data)
    }

    fn find(&self, table: &str, field: &str, value: &str) -> Option<&Value> {
        self.rows
            .iter()
            .filter(|r| r.table == table)
            .map(|r| &r.data)
            .find(|d| d.get(field).map(text).as_deref() == Some(value))
    }

    fn find_mut(&mut self, table: &str, field: &str, value: &str) -> Option<&mut Value> {
        self.rows_mut(table)
            .find(|d| d.get(field).map(text).as_deref() == Some(value))
    }

    fn balance(&self, address: &str) -> u128 {
        self.balances.get(address).copied().unwrap_or(0)
    }
}

pub struct FakePlatform {
    ledger: Mutex<Ledger>,
    lag: u32,
    queries: AtomicUsize,
}

impl FakePlatform {
    /// A platform whose index shows writes immediately.
    pub fn new() -> Self {
        Self::with_lag(0)
    }

    /// A platform whose index hides new rows for `lag` queries.
    pub fn with_lag(lag: u32) -> Self {
        let mut ledger = Ledger::default();
        let admin_account = ledger.address();
        ledger
            .accounts
            .insert(ADMIN.to_string(), (ADMIN_PASSWORD.to_string(), admin_account.clone()));
        ledger
            .balances
            .insert(admin_account, Wei::from_ether(FAUCET_ETHER).0);
        ledger.admin_interface = ledger.address();
        ledger.user_manager = ledger.address();
        ledger.project_manager = ledger.address();
        Self {
            ledger: Mutex::new(ledger),
            lag,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn admin(&self) -> Credential {
        let ledger = self.ledger.lock().unwrap();
        let (password, address) = ledger.accounts[ADMIN].clone();
        Credential::new(ADMIN, password, address)
    }

    pub fn admin_interface(&self) -> ContractRef {
        ContractRef::new("AdminInterface", self.ledger.lock().unwrap().admin_interface.clone())
    }

    pub fn user_manager(&self) -> ContractRef {
        ContractRef::new("UserManager", self.ledger.lock().unwrap().user_manager.clone())
    }

    pub fn project_manager(&self) -> ContractRef {
        ContractRef::new("ProjectManager", self.ledger.lock().unwrap().project_manager.clone())
    }

    /// Break the admin interface by clearing a sub-contract slot.
    pub fn clear_project_manager(&self) {
        self.ledger.lock().unwrap().project_manager = ZERO.to_string();
    }

    pub fn insert_row(&self, table: &str, data: Value) {
        self.ledger.lock().unwrap().rows.push(Row {
            table: table.to_string(),
            data,
            pending: self.lag,
        });
    }

    /// Overwrite one column of every row in `table` matching `field = value`.
    pub fn set_column(&self, table: &str, field: &str, value: &str, column: &str, new: Value) {
        let mut ledger = self.ledger.lock().unwrap();
        for row in ledger.rows_mut(table) {
            if row.get(field).map(text).as_deref() == Some(value) {
                row[column] = new.clone();
            }
        }
    }

    pub fn set_balance(&self, address: &str, wei: Wei) {
        self.ledger
            .lock()
            .unwrap()
            .balances
            .insert(address.to_string(), wei.0);
    }

    pub fn balance_of(&self, address: &str) -> Wei {
        Wei(self.ledger.lock().unwrap().balance(address))
    }

    pub fn escrow_of(&self, bid_address: &str) -> Wei {
        let ledger = self.ledger.lock().unwrap();
        Wei(ledger.bids.get(bid_address).map(|b| b.escrow).unwrap_or(0))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.ledger.lock().unwrap().calls.clone()
    }

    pub fn compiled(&self) -> Vec<String> {
        self.ledger.lock().unwrap().compiled.clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn push_row(&self, ledger: &mut Ledger, table: &str, data: Value) {
        ledger.rows.push(Row {
            table: table.to_string(),
            data,
            pending: self.lag,
        });
    }

    fn user_manager_call(&self, ledger: &mut Ledger, method: &str, args: &Value) -> Vec<Value> {
        let username = str_arg(args, "username");
        let existing = ledger
            .find("User", "username", &username)
            .and_then(|u| u.get("address").map(text));
        match method {
            "createUser" => {
                if existing.is_some() {
                    return vec![json!(4)];
                }
                let address = ledger.address();
                let row = json!({
                    "address": address,
                    "account": str_arg(args, "account"),
                    "username": username,
                    "pwHash": str_arg(args, "pwHash"),
                    "role": args["role"].clone(),
                });
                self.push_row(ledger, "User", row);
                ledger.users.push(address);
                vec![json!(1)]
            }
            "exists" => vec![json!(existing.is_some())],
            "getUser" => vec![json!(existing.unwrap_or_else(|| ZERO.to_string()))],
            "login" => {
                let ok = ledger
                    .find("User", "username", &username)
                    .map(|u| u["pwHash"] == args["pwHash"])
                    .unwrap_or(false);
                vec![json!(ok)]
            }
            _ => vec![json!(2)],
        }
    }

    fn project_manager_call(&self, ledger: &mut Ledger, method: &str, args: &Value) -> Vec<Value> {
        match method {
            "createProject" => {
                let name = str_arg(args, "name");
                if ledger.find("Project", "name", &name).is_some() {
                    return vec![json!(4)];
                }
                let address = ledger.address();
                let mut row = args.clone();
                row["address"] = json!(address);
                row["state"] = json!("1");
                self.push_row(ledger, "Project", row);
                ledger.projects.push(address);
                vec![json!(1)]
            }
            "getProject" => {
                let name = str_arg(args, "name");
                let address = ledger
                    .find("Project", "name", &name)
                    .and_then(|p| p.get("address").map(text))
                    .unwrap_or_else(|| ZERO.to_string());
                vec![json!(address)]
            }
            "exists" => {
                let name = str_arg(args, "name");
                vec![json!(ledger.find("Project", "name", &name).is_some())]
            }
            "createBid" => {
                let name = str_arg(args, "name");
                if ledger.find("Project", "name", &name).is_none() {
                    return vec![json!(3)];
                }
                ledger.next_bid_id += 1;
                let id = ledger.next_bid_id;
                let address = ledger.address();
                ledger.bids.insert(
                    address.clone(),
                    BidContract {
                        id,
                        state: 1,
                        escrow: 0,
                    },
                );
                let row = json!({
                    "id": id,
                    "name": name,
                    "supplier": str_arg(args, "supplier"),
                    "amount": args["amount"].clone(),
                    "state": 1,
                    "address": address,
                });
                self.push_row(ledger, "Bid", row);
                vec![json!(1), json!(id.to_string())]
            }
            "handleEvent" => {
                let address = str_arg(args, "projectAddress");
                let event = as_u64(&args["projectEvent"]).unwrap_or(0);
                let Some(project) = ledger.find_mut("Project", "address", &address) else {
                    return vec![json!(3)];
                };
                let state = as_u64(&project["state"]).unwrap_or(0);
                let next = match (state, event) {
                    (1, 1) => 2,
                    (2, 2) => 3,
                    (3, 3) => 4,
                    _ => return vec![json!(2), json!(state)],
                };
                project["state"] = json!(next);
                vec![json!(1), json!(next)]
            }
            "settleProject" => {
                let name = str_arg(args, "name");
                let Some(project) = ledger.find_mut("Project", "name", &name) else {
                    return vec![json!(3)];
                };
                if as_u64(&project["state"]) != Some(3) {
                    return vec![json!(2)];
                }
                project["state"] = json!(4);
                let bid_address = str_arg(args, "bidAddress");
                let escrow = ledger
                    .bids
                    .get_mut(&bid_address)
                    .map(|b| std::mem::take(&mut b.escrow))
                    .unwrap_or(0);
                *ledger
                    .balances
                    .entry(str_arg(args, "supplierAddress"))
                    .or_default() += escrow;
                vec![json!(1)]
            }
            _ => vec![json!(2)],
        }
    }

    fn bid_call(
        &self,
        ledger: &mut Ledger,
        caller: &Credential,
        bid_address: &str,
        method: &str,
        args: &Value,
        value: Wei,
    ) -> Result<Vec<Value>> {
        if method != "setBidState" {
            return Ok(vec![json!(2)]);
        }
        let new_state = as_u64(&args["newState"]).unwrap_or(0);
        let balance = ledger.balance(&caller.address);
        let Some(bid) = ledger.bids.get_mut(bid_address) else {
            return Ok(vec![json!(3)]);
        };
        if bid.state != 1 {
            return Ok(vec![json!(2)]);
        }
        if value.0 > balance {
            // The node rejects under-funded transactions at the HTTP layer.
            return Err(MarketError::Platform {
                status: 400,
                message: "insufficient balance".to_string(),
            });
        }
        bid.state = new_state;
        bid.escrow += value.0;
        let id = bid.id.to_string();
        ledger.balances.insert(caller.address.clone(), balance - value.0);
        if let Some(row) = ledger.find_mut("Bid", "id", &id) {
            row["state"] = json!(new_state);
        }
        Ok(vec![json!(1)])
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn call_method(
        &self,
        caller: &Credential,
        contract: &ContractRef,
        method: &str,
        args: Value,
        value: Wei,
    ) -> Result<Vec<Value>> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.calls.push(RecordedCall {
            caller: caller.username.clone(),
            contract: contract.name.clone(),
            method: method.to_string(),
            args: args.clone(),
            value,
        });
        match contract.name.as_str() {
            "UserManager" => Ok(self.user_manager_call(&mut ledger, method, &args)),
            "ProjectManager" => Ok(self.project_manager_call(&mut ledger, method, &args)),
            "Bid" => self.bid_call(&mut ledger, caller, &contract.address, method, &args, value),
            other => Err(MarketError::Platform {
                status: 404,
                message: format!("unknown contract {other}"),
            }),
        }
    }

    async fn query(&self, query: &Query) -> Result<Vec<Value>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut ledger = self.ledger.lock().unwrap();
        let rows: Vec<Value> = ledger
            .rows
            .iter()
            .filter(|r| r.pending == 0 && r.table == query.table_name())
            .filter(|r| query.filters().iter().all(|(f, e)| matches(&r.data, f, e)))
            .map(|r| r.data.clone())
            .collect();
        for row in ledger.rows.iter_mut() {
            row.pending = row.pending.saturating_sub(1);
        }
        Ok(rows)
    }

    async fn get_state(&self, contract: &ContractRef) -> Result<Map<String, Value>> {
        let ledger = self.ledger.lock().unwrap();
        let state = if contract.address == ledger.admin_interface {
            json!({
                "userManager": ledger.user_manager,
                "projectManager": ledger.project_manager,
            })
        } else if contract.address == ledger.project_manager {
            let mut projects = vec![ZERO.to_string()];
            projects.extend(ledger.projects.iter().cloned());
            json!({ "projects": projects })
        } else if contract.address == ledger.user_manager {
            let mut users = vec![ZERO.to_string()];
            users.extend(ledger.users.iter().cloned());
            json!({ "users": users })
        } else {
            return Err(MarketError::Platform {
                status: 404,
                message: format!("no contract at {}", contract.address),
            });
        };
        match state {
            Value::Object(map) => Ok(map),
            _ => unreachable!(),
        }
    }

    async fn get_key(&self, username: &str) -> Result<String> {
        let ledger = self.ledger.lock().unwrap();
        ledger
            .accounts
            .get(username)
            .map(|(_, address)| address.clone())
            .ok_or_else(|| MarketError::Platform {
                status: 404,
                message: format!("no user {username}"),
            })
    }

    async fn create_user(&self, username: &str, password: &str) -> Result<String> {
        let mut ledger = self.ledger.lock().unwrap();
        if ledger.accounts.contains_key(username) {
            return Err(MarketError::Platform {
                status: 400,
                message: format!("user {username} exists"),
            });
        }
        let address = ledger.address();
        ledger
            .accounts
            .insert(username.to_string(), (password.to_string(), address.clone()));
        ledger
            .balances
            .insert(address.clone(), Wei::from_ether(FAUCET_ETHER).0);
        Ok(address)
    }

    async fn get_balance(&self, address: &str) -> Result<Wei> {
        Ok(Wei(self.ledger.lock().unwrap().balance(address)))
    }

    async fn upload_contract(
        &self,
        _admin: &Credential,
        name: &str,
        _source: &str,
        _args: Value,
    ) -> Result<UploadedContract> {
        let ledger = self.ledger.lock().unwrap();
        if name != "AdminInterface" {
            return Err(MarketError::Platform {
                status: 400,
                message: format!("cannot upload {name}"),
            });
        }
        Ok(UploadedContract {
            contract: ContractRef::new(name, ledger.admin_interface.clone()),
            code_hash: format!("hash-{name}"),
        })
    }

    async fn compile_search(
        &self,
        searchable: &[&str],
        _contract_name: &str,
        _source: &str,
    ) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.compiled.extend(searchable.iter().map(|s| s.to_string()));
        Ok(())
    }
}

/// Serve `router` on an ephemeral local port; returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}")
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn str_arg(args: &Value, key: &str) -> String {
    args.get(key).map(text).unwrap_or_default()
}

fn matches(row: &Value, field: &str, expr: &str) -> bool {
    let Some(actual) = row.get(field).map(text) else {
        return false;
    };
    if let Some(expected) = expr.strip_prefix("eq.") {
        actual == expected
    } else if let Some(list) = expr.strip_prefix("in.") {
        list.split(',').any(|v| v == actual)
    } else {
        false
    }
}
