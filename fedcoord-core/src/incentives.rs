//! Token accounting for participation rewards.
//!
//! Accepted updates earn a base reward, plus a speed bonus for fast
//! submissions and a consistency bonus once a streak of consecutive
//! accepted rounds is reached. Dropping out of a round breaks the streak
//! and costs a penalty; balances never go below zero. These tokens are a
//! participation ledger, not a currency.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fedcoord_common::config::IncentiveConfig;
use fedcoord_common::unix_time_ms;

/// One reward grant, kept for per-client history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardEntry {
    pub round_id: u64,
    pub total: f64,
    pub base: f64,
    pub speed_bonus: f64,
    pub consistency_bonus: f64,
    pub granted_at_ms: u64,
}

/// Mutable incentive state for one client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncentiveRecord {
    balance: f64,
    pub consecutive_accepted_rounds: u32,
    pub last_reward_round: Option<u64>,
    pub speed_bonuses: u32,
    pub consistency_bonuses: u32,
    pub rewards: Vec<RewardEntry>,
}

impl IncentiveRecord {
    /// Current balance; non-negative by construction.
    pub fn balance(&self) -> f64 {
        self.balance
    }
}

/// Serializable view of one client's incentives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncentiveSnapshot {
    pub client_id: String,
    pub token_balance: f64,
    pub consecutive_accepted_rounds: u32,
    pub last_reward_round: Option<u64>,
    pub speed_bonuses: u32,
    pub consistency_bonuses: u32,
    pub total_rewards: usize,
}

/// Incentive ledger keyed by client id.
#[derive(Debug)]
pub struct IncentiveLedger {
    config: IncentiveConfig,
    records: HashMap<String, IncentiveRecord>,
}

impl IncentiveLedger {
    pub fn new(config: IncentiveConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
        }
    }

    fn entry(&mut self, client_id: &str) -> &mut IncentiveRecord {
        self.records.entry(client_id.to_string()).or_default()
    }

    /// Grants the reward for an accepted update and returns the total
    /// amount credited.
    pub fn update_accepted(&mut self, client_id: &str, round_id: u64, latency: Duration) -> f64 {
        let config = self.config.clone();
        let record = self.entry(client_id);

        let base = config.base_reward;
        let speed_bonus = if latency < config.speed_threshold {
            record.speed_bonuses += 1;
            config.speed_bonus
        } else {
            0.0
        };
        let consistency_bonus = if record.consecutive_accepted_rounds >= config.consistency_threshold
        {
            record.consistency_bonuses += 1;
            config.consistency_bonus
        } else {
            0.0
        };

        let total = base + speed_bonus + consistency_bonus;
        record.balance += total;
        record.consecutive_accepted_rounds += 1;
        record.last_reward_round = Some(round_id);
        record.rewards.push(RewardEntry {
            round_id,
            total,
            base,
            speed_bonus,
            consistency_bonus,
            granted_at_ms: unix_time_ms(),
        });

        total
    }

    /// Applies the dropout penalty: the streak resets and tokens are
    /// deducted down to a floor of zero.
    pub fn dropout(&mut self, client_id: &str) {
        let penalty = self.config.dropout_penalty;
        let record = self.entry(client_id);
        record.consecutive_accepted_rounds = 0;
        record.balance = (record.balance - penalty).max(0.0);
    }

    pub fn record(&self, client_id: &str) -> Option<&IncentiveRecord> {
        self.records.get(client_id)
    }

    pub fn snapshot(&self, client_id: &str) -> Option<IncentiveSnapshot> {
        self.records
            .get(client_id)
            .map(|r| make_snapshot(client_id, r))
    }

    /// All snapshots, highest balance first.
    pub fn all(&self) -> Vec<IncentiveSnapshot> {
        let mut all: Vec<_> = self
            .records
            .iter()
            .map(|(id, r)| make_snapshot(id, r))
            .collect();
        all.sort_by(|a, b| {
            b.token_balance
                .partial_cmp(&a.token_balance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.client_id.cmp(&b.client_id))
        });
        all
    }
}

fn make_snapshot(client_id: &str, record: &IncentiveRecord) -> IncentiveSnapshot {
    IncentiveSnapshot {
        client_id: client_id.to_string(),
        token_balance: record.balance(),
        consecutive_accepted_rounds: record.consecutive_accepted_rounds,
        last_reward_round: record.last_reward_round,
        speed_bonuses: record.speed_bonuses,
        consistency_bonuses: record.consistency_bonuses,
        total_rewards: record.rewards.len(),
    }
}
