//! Scripted executor used by engine tests.

use crate::agent::AgentExecutor;
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Delay(Duration),
    FailTimes(u32),
    AlwaysFail,
    Hang,
    Panic,
}

#[derive(Default)]
pub struct ScriptedExecutor {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<Vec<String>>,
    inputs: Mutex<HashMap<String, Value>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, agent_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(agent_id.to_string(), behavior);
        self
    }

    pub fn calls_for(&self, agent_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == agent_id)
            .count()
    }

    /// Agent ids in the order calls arrived
    pub fn call_order(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_input(&self, agent_id: &str) -> Option<Value> {
        self.inputs.lock().unwrap().get(agent_id).cloned()
    }

    /// Highest number of simultaneous calls observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn execute(&self, agent_id: &str, input: Value) -> anyhow::Result<Value> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(agent_id.to_string());
            calls.iter().filter(|c| c.as_str() == agent_id).count() as u32
        };
        self.inputs
            .lock()
            .unwrap()
            .insert(agent_id.to_string(), input);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        let behavior = self
            .behaviors
            .get(agent_id)
            .cloned()
            .unwrap_or(Behavior::Succeed);

        let result = match behavior {
            Behavior::Succeed => Ok(json!({ "agent": agent_id, "call": call })),
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(json!({ "agent": agent_id, "call": call }))
            }
            Behavior::FailTimes(n) if call <= n => Err(anyhow!("scripted failure {}", call)),
            Behavior::FailTimes(_) => Ok(json!({ "agent": agent_id, "call": call })),
            Behavior::AlwaysFail => Err(anyhow!("scripted failure {}", call)),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            }
            Behavior::Panic => panic!("scripted panic in {}", agent_id),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
