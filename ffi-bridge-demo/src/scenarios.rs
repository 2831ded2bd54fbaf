//! Demo scenarios
//!
//! Each scenario drives one part of the bridge against the native backend,
//! waits for its callbacks with a bounded timeout (never a sleep) and checks
//! what was delivered against the configured expectations.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use ffi_bridge::{native, AppInfo, Bridge, BridgeError, Event, Key, PendingCall, Reply};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::config::DemoConfig;
use crate::recorder::{Delivery, Recorder};

/// Scenario failures
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("{what}: expected {expected}, got {actual}")]
    Mismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("{0}: callback was not delivered")]
    Missing(String),

    #[error("Setup failed: {0}")]
    Setup(String),
}

type Outcome = std::result::Result<(), ScenarioError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    RegisterApp,
    AppId,
    AppName,
    AppKey,
    RandomNumbers,
    RandomKeys,
    AppInfo,
    CreateAccount,
    AccountEvents,
    VerifySignature,
    VerifyKeys,
    StringSync,
    StringAsync,
    AuthRequest,
    Stress,
}

impl Scenario {
    pub fn all() -> &'static [Scenario] {
        Scenario::value_variants()
    }

    pub fn name(self) -> String {
        self.to_possible_value()
            .map(|value| value.get_name().to_string())
            .unwrap_or_else(|| format!("{:?}", self))
    }

    pub fn description(self) -> &'static str {
        match self {
            Scenario::RegisterApp => "register an app record",
            Scenario::AppId => "read the id back from an app record",
            Scenario::AppName => "read the name back from an app record",
            Scenario::AppKey => "read the key back from an app record",
            Scenario::RandomNumbers => "receive a generated list of integers",
            Scenario::RandomKeys => "receive a generated list of keys",
            Scenario::AppInfo => "receive an app record as separate fields",
            Scenario::CreateAccount => "connect and disconnect callbacks on one handle",
            Scenario::AccountEvents => "tagged-union event stream ending in disconnect",
            Scenario::VerifySignature => "accepted and rejected signatures",
            Scenario::VerifyKeys => "pass an array of keys",
            Scenario::StringSync => "callback invoked before the call returns",
            Scenario::StringAsync => "callback invoked on a native worker thread",
            Scenario::AuthRequest => "owned request, borrowed response",
            Scenario::Stress => "parallel calls exercising the registry",
        }
    }
}

/// Result of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: f64,
    pub passed: bool,
    pub error: Option<String>,
    pub deliveries: Vec<Delivery>,
}

/// Shared state of a scenario run
pub struct Runner<'a> {
    bridge: &'a Bridge,
    config: &'a DemoConfig,
    timeout: Duration,
}

impl<'a> Runner<'a> {
    pub fn new(bridge: &'a Bridge, config: &'a DemoConfig, timeout: Duration) -> Self {
        Self {
            bridge,
            config,
            timeout,
        }
    }

    pub fn run(&self, scenario: Scenario) -> ScenarioReport {
        let recorder = Recorder::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        log::info!("Running scenario {}", scenario.name());

        let outcome = self.dispatch(scenario, &recorder);
        let elapsed_ms = clock.elapsed().as_secs_f64() * 1000.0;

        match &outcome {
            Ok(()) => log::info!(
                "Scenario {} passed ({} deliveries, {:.1} ms)",
                scenario.name(),
                recorder.len(),
                elapsed_ms
            ),
            Err(err) => log::error!("Scenario {} failed: {}", scenario.name(), err),
        }

        ScenarioReport {
            scenario,
            started_at,
            elapsed_ms,
            passed: outcome.is_ok(),
            error: outcome.err().map(|err| err.to_string()),
            deliveries: recorder.deliveries(),
        }
    }

    fn dispatch(&self, scenario: Scenario, recorder: &Recorder) -> Outcome {
        match scenario {
            Scenario::RegisterApp => self.register_app(recorder),
            Scenario::AppId => self.app_id(recorder),
            Scenario::AppName => self.app_name(recorder),
            Scenario::AppKey => self.app_key(recorder),
            Scenario::RandomNumbers => self.random_numbers(recorder),
            Scenario::RandomKeys => self.random_keys(recorder),
            Scenario::AppInfo => self.app_info(recorder),
            Scenario::CreateAccount => self.create_account(recorder),
            Scenario::AccountEvents => self.account_events(recorder),
            Scenario::VerifySignature => self.verify_signature(recorder),
            Scenario::VerifyKeys => self.verify_keys(recorder),
            Scenario::StringSync => self.string_sync(recorder),
            Scenario::StringAsync => self.string_async(recorder),
            Scenario::AuthRequest => self.auth_request(recorder),
            Scenario::Stress => self.stress(recorder),
        }
    }

    fn app(&self) -> AppInfo {
        self.config.app.app_info()
    }

    /// Wait for a call and take the single reply it delivered
    fn settle<T>(
        &self,
        call: PendingCall,
        rx: &Receiver<T>,
    ) -> std::result::Result<T, ScenarioError> {
        call.wait(self.timeout)?;
        rx.try_recv()
            .map_err(|_| ScenarioError::Missing(call.entry().to_string()))
    }

    fn register_app(&self, recorder: &Recorder) -> Outcome {
        let (on_reply, rx) = reply_channel::<()>(recorder, "register_app");
        let call = self.bridge.register_app(&self.app(), on_reply)?;
        self.settle(call, &rx)??;
        Ok(())
    }

    fn app_id(&self, recorder: &Recorder) -> Outcome {
        let (on_reply, rx) = reply_channel::<i32>(recorder, "get_app_id");
        let call = self.bridge.get_app_id(&self.app(), on_reply)?;
        let id = self.settle(call, &rx)??;
        expect_eq("app id", &self.config.app.id, &id)
    }

    fn app_name(&self, recorder: &Recorder) -> Outcome {
        let (on_reply, rx) = reply_channel::<String>(recorder, "get_app_name");
        let call = self.bridge.get_app_name(&self.app(), on_reply)?;
        let name = self.settle(call, &rx)??;
        expect_eq("app name", &self.config.app.name, &name)
    }

    fn app_key(&self, recorder: &Recorder) -> Outcome {
        let (on_reply, rx) = reply_channel::<Key>(recorder, "get_app_key");
        let call = self.bridge.get_app_key(&self.app(), on_reply)?;
        let key = self.settle(call, &rx)??;
        expect_eq("app key", &self.config.app.key, &key)
    }

    fn random_numbers(&self, recorder: &Recorder) -> Outcome {
        let (on_reply, rx) = reply_channel::<Vec<i32>>(recorder, "random_numbers");
        let call = self.bridge.random_numbers(on_reply)?;
        let numbers = self.settle(call, &rx)??;
        expect_non_empty("random numbers", numbers.len())
    }

    fn random_keys(&self, recorder: &Recorder) -> Outcome {
        let (on_reply, rx) = reply_channel::<Vec<Key>>(recorder, "random_keys");
        let call = self.bridge.random_keys(on_reply)?;
        let keys = self.settle(call, &rx)??;
        expect_non_empty("random keys", keys.len())
    }

    fn app_info(&self, recorder: &Recorder) -> Outcome {
        let (on_reply, rx) = reply_channel::<(i32, String, Key)>(recorder, "get_app_info");
        let call = self.bridge.get_app_info(&self.app(), on_reply)?;
        let (id, name, key) = self.settle(call, &rx)??;
        let app = self.app();
        expect_eq("app info", &(app.id, app.name, app.key), &(id, name, key))
    }

    fn create_account(&self, recorder: &Recorder) -> Outcome {
        let account = &self.config.account;
        let (connect_tx, rx) = mpsc::channel();
        let disconnect_tx = connect_tx.clone();
        let (on_connect_log, on_disconnect_log) = (recorder.clone(), recorder.clone());

        let call = self.bridge.create_account(
            &account.locator,
            &account.password,
            move |reply: Reply<AppInfo>| {
                on_connect_log.record_reply("create_account [connect]", &reply);
                let _ = connect_tx.send(AccountStep::Connected(reply));
            },
            move |reply: Reply<()>| {
                on_disconnect_log.record_reply("create_account [disconnect]", &reply);
                let _ = disconnect_tx.send(AccountStep::Disconnected(reply));
            },
        )?;
        call.wait(self.timeout)?;

        let steps: Vec<AccountStep> = rx.try_iter().collect();
        match steps.as_slice() {
            [AccountStep::Connected(Ok(app)), AccountStep::Disconnected(Ok(()))] => expect_eq(
                "account name",
                &format!("{}:{}", account.locator, account.password),
                &app.name,
            ),
            other => Err(ScenarioError::Mismatch {
                what: "account notifications".to_string(),
                expected: "connect then disconnect".to_string(),
                actual: format!("{:?}", other),
            }),
        }
    }

    fn account_events(&self, recorder: &Recorder) -> Outcome {
        let account = &self.config.account;
        let (tx, rx) = mpsc::channel();
        let log = recorder.clone();

        let call = self
            .bridge
            .create_account_events(&account.locator, &account.password, move |reply| {
                log.record_reply("create_account_events", &reply);
                let _ = tx.send(reply);
            })?;
        call.wait(self.timeout)?;

        let events = rx.try_iter().collect::<Reply<Vec<Event>>>()?;
        match events.as_slice() {
            [Event::Connected(app), Event::Disconnected] => expect_eq(
                "account name",
                &format!("{}:{}", account.locator, account.password),
                &app.name,
            ),
            other => Err(ScenarioError::Mismatch {
                what: "account events".to_string(),
                expected: "[Connected, Disconnected]".to_string(),
                actual: format!("{:?}", other),
            }),
        }
    }

    fn verify_signature(&self, recorder: &Recorder) -> Outcome {
        let signatures = &self.config.signatures;
        for signature in &signatures.accepted {
            let (on_reply, rx) = reply_channel::<()>(recorder, "verify_signature");
            let call = self.bridge.verify_signature(signature, on_reply)?;
            self.settle(call, &rx)??;
        }
        for signature in &signatures.rejected {
            let (on_reply, rx) = reply_channel::<()>(recorder, "verify_signature");
            let call = self.bridge.verify_signature(signature, on_reply)?;
            let code = self.settle(call, &rx)?.err().and_then(|err| err.native_code());
            expect_eq(
                "rejected signature code",
                &Some(native::INVALID_SIGNATURE),
                &code,
            )?;
        }
        Ok(())
    }

    fn verify_keys(&self, recorder: &Recorder) -> Outcome {
        let (on_reply, rx) = reply_channel::<()>(recorder, "verify_keys");
        let call = self.bridge.verify_keys(&self.config.keys.verify, on_reply)?;
        self.settle(call, &rx)??;
        Ok(())
    }

    fn string_sync(&self, recorder: &Recorder) -> Outcome {
        let (on_reply, rx) = threaded_channel::<String>(recorder, "with_string");
        let call = self.bridge.with_string(on_reply)?;

        // Nothing to wait for: the callback already ran
        expect_eq("settled on return", &true, &call.is_settled())?;
        let (ran_on, reply) = rx
            .try_recv()
            .map_err(|_| ScenarioError::Missing(call.entry().to_string()))?;
        reply?;
        expect_eq("callback thread", &thread::current().id(), &ran_on)
    }

    fn string_async(&self, recorder: &Recorder) -> Outcome {
        let (on_reply, rx) = threaded_channel::<String>(recorder, "with_string_async");
        let call = self.bridge.with_string_async(on_reply)?;
        let (ran_on, reply) = self.settle(call, &rx)?;
        reply?;
        if ran_on == thread::current().id() {
            return Err(ScenarioError::Mismatch {
                what: "callback thread".to_string(),
                expected: "a native worker thread".to_string(),
                actual: "the calling thread".to_string(),
            });
        }
        Ok(())
    }

    fn auth_request(&self, recorder: &Recorder) -> Outcome {
        let info = self.config.auth.request_info();
        let request = self.bridge.new_auth_request(&info)?;
        let (tx, rx) = mpsc::channel();
        let log = recorder.clone();

        let call = self.bridge.on_auth_request(&request, move |reply| {
            // The response is only valid here, so copy it out
            let reply = reply.and_then(|response| response.try_to_owned());
            log.record_reply("on_auth_request", &reply);
            let _ = tx.send(reply);
        })?;
        // The backend keeps its own copy of the request
        request.release()?;

        let response = self.settle(call, &rx)??;
        expect_eq("original request id", &info.request_id, &response.original_request_id)?;
        if !response.message.contains(&info.app_id) {
            return Err(ScenarioError::Mismatch {
                what: "auth response".to_string(),
                expected: format!("a message naming {}", info.app_id),
                actual: response.message,
            });
        }
        expect_eq("live native objects", &0, &self.bridge.tracker().live_count())
    }

    fn stress(&self, recorder: &Recorder) -> Outcome {
        let stress = &self.config.stress;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(stress.threads)
            .build()
            .map_err(|e| ScenarioError::Setup(e.to_string()))?;

        let base = self.app();
        let mismatches = pool.install(|| {
            (0..stress.calls)
                .into_par_iter()
                .map(|i| -> std::result::Result<usize, ScenarioError> {
                    let id = i32::try_from(i).unwrap_or(i32::MAX);
                    let app = AppInfo::new(id, base.name.clone(), base.key);
                    let (tx, rx) = mpsc::channel();
                    let call = self.bridge.get_app_id(&app, move |reply| {
                        let _ = tx.send(reply);
                    })?;
                    let got = self.settle(call, &rx)??;
                    Ok(usize::from(got != id))
                })
                .try_reduce(|| 0, |a, b| Ok(a + b))
        })?;

        recorder.note(
            "stress",
            format!("{} parallel get_app_id calls, {} mismatched", stress.calls, mismatches),
        );
        expect_eq("mismatched replies", &0, &mismatches)
    }
}

#[derive(Debug)]
enum AccountStep {
    Connected(Reply<AppInfo>),
    Disconnected(Reply<()>),
}

/// A callback that records its reply and forwards it to the returned receiver
fn reply_channel<T>(
    recorder: &Recorder,
    label: &'static str,
) -> (impl FnOnce(Reply<T>) + Send + 'static, Receiver<Reply<T>>)
where
    T: Debug + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let recorder = recorder.clone();
    let on_reply = move |reply: Reply<T>| {
        recorder.record_reply(label, &reply);
        let _ = tx.send(reply);
    };
    (on_reply, rx)
}

/// Like `reply_channel`, also reporting the thread the callback ran on
fn threaded_channel<T>(
    recorder: &Recorder,
    label: &'static str,
) -> (impl FnOnce(Reply<T>) + Send + 'static, Receiver<(ThreadId, Reply<T>)>)
where
    T: Debug + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let recorder = recorder.clone();
    let on_reply = move |reply: Reply<T>| {
        recorder.record_reply(label, &reply);
        let _ = tx.send((thread::current().id(), reply));
    };
    (on_reply, rx)
}

fn expect_eq<T: PartialEq + Debug>(what: &str, expected: &T, actual: &T) -> Outcome {
    if expected == actual {
        Ok(())
    } else {
        Err(ScenarioError::Mismatch {
            what: what.to_string(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        })
    }
}

fn expect_non_empty(what: &str, len: usize) -> Outcome {
    if len == 0 {
        return Err(ScenarioError::Mismatch {
            what: what.to_string(),
            expected: "at least one element".to_string(),
            actual: "none".to_string(),
        });
    }
    Ok(())
}
