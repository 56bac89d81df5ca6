//! Traffic-counter aggregation.
//!
//! Counter names arrive as `<scope>>>><name>>>>traffic>>><direction>`
//! tuples. The aggregator groups them into per-user, per-inbound and
//! per-outbound samples, drops all-zero entries, and derives per-user
//! rates against the previous snapshot. Because every poll resets the
//! counters on the core side, a delta equals the bytes accrued in the
//! interval and the rate is an interval average; negative deltas (the
//! reset race) are clipped to zero.

use crate::rpc::RawStat;
use std::collections::BTreeMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Per-user traffic with derived interval-average rates (bytes/s).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserTraffic {
    pub email: String,
    pub upload: i64,
    pub download: i64,
    pub upload_rate: i64,
    pub download_rate: i64,
}

/// Per-inbound or per-outbound traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeTraffic {
    pub tag: String,
    pub upload: i64,
    pub download: i64,
}

/// One full counter query, grouped by scope.
#[derive(Debug, Clone, Default)]
pub struct TrafficSnapshot {
    pub users: Vec<UserTraffic>,
    pub inbounds: Vec<ScopeTraffic>,
    pub outbounds: Vec<ScopeTraffic>,
    /// Unix seconds at which the snapshot was taken.
    pub timestamp: i64,
}

/// Stateful aggregator; holds the previous snapshot for rate derivation.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    last_users: BTreeMap<String, (i64, i64)>,
    last_at: Option<Instant>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a raw counter query into a snapshot and remember it.
    pub fn ingest(&mut self, raw: &[RawStat]) -> TrafficSnapshot {
        self.ingest_at(raw, Instant::now())
    }

    pub fn ingest_at(&mut self, raw: &[RawStat], now: Instant) -> TrafficSnapshot {
        let mut users: BTreeMap<String, (i64, i64)> = BTreeMap::new();
        let mut inbounds: BTreeMap<String, (i64, i64)> = BTreeMap::new();
        let mut outbounds: BTreeMap<String, (i64, i64)> = BTreeMap::new();

        for stat in raw {
            let Some((scope, name, direction)) = parse_counter(&stat.name) else {
                continue;
            };
            let bucket = match scope {
                "user" => &mut users,
                "inbound" => &mut inbounds,
                "outbound" => &mut outbounds,
                _ => continue,
            };
            let entry = bucket.entry(name.to_string()).or_default();
            match direction {
                "uplink" => entry.0 = stat.value,
                "downlink" => entry.1 = stat.value,
                _ => {}
            }
        }

        let elapsed = self.last_at.map(|t| now.duration_since(t).as_secs_f64());

        let snapshot = TrafficSnapshot {
            users: users
                .iter()
                .filter(|(_, (up, down))| *up > 0 || *down > 0)
                .map(|(email, (up, down))| {
                    // Rates only for users present in both snapshots.
                    let (upload_rate, download_rate) = match (elapsed, self.last_users.get(email)) {
                        (Some(secs), Some(prev)) if secs > 0.0 => {
                            (rate(*up - prev.0, secs), rate(*down - prev.1, secs))
                        }
                        _ => (0, 0),
                    };
                    UserTraffic {
                        email: email.clone(),
                        upload: *up,
                        download: *down,
                        upload_rate,
                        download_rate,
                    }
                })
                .collect(),
            inbounds: scope_samples(inbounds),
            outbounds: scope_samples(outbounds),
            timestamp: unix_now(),
        };

        self.last_users = snapshot
            .users
            .iter()
            .map(|u| (u.email.clone(), (u.upload, u.download)))
            .collect();
        self.last_at = Some(now);
        snapshot
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// `max(0, delta) / elapsed`, truncated to whole bytes per second.
fn rate(delta: i64, elapsed_secs: f64) -> i64 {
    if delta <= 0 {
        return 0;
    }
    (delta as f64 / elapsed_secs) as i64
}

fn scope_samples(bucket: BTreeMap<String, (i64, i64)>) -> Vec<ScopeTraffic> {
    bucket
        .into_iter()
        .filter(|(_, (up, down))| *up > 0 || *down > 0)
        .map(|(tag, (upload, download))| ScopeTraffic {
            tag,
            upload,
            download,
        })
        .collect()
}

/// Split `scope>>>name>>>traffic>>>direction`; anything else (including
/// non-traffic tuples such as online gauges) is discarded.
fn parse_counter(name: &str) -> Option<(&str, &str, &str)> {
    let mut parts = name.split(">>>");
    let scope = parts.next()?;
    let subject = parts.next()?;
    let kind = parts.next()?;
    let direction = parts.next()?;
    if parts.next().is_some() || kind != "traffic" {
        return None;
    }
    Some((scope, subject, direction))
}
