//! Health monitoring for the gateway's long-running parts.
//!
//! Components are tracked by name; the ingestion pipeline reports on
//! `notifications`, `storage` and `registration`. The overall status is the
//! worst component status.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Component reporting channel reachability
pub const COMPONENT_NOTIFICATIONS: &str = "notifications";
/// Component reporting backend reachability
pub const COMPONENT_STORAGE: &str = "storage";
/// Component reporting the registration endpoint
pub const COMPONENT_REGISTRATION: &str = "registration";

/// Window over which the registration rate is computed
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Health status levels, ordered from best to worst
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    /// Failing intermittently, still making progress
    Degraded,
    /// Not making progress
    Unhealthy,
}

/// Snapshot of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Seconds since the component last reported healthy
    pub secs_since_healthy: Option<f64>,
}

/// Overall health report, served on `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_secs: f64,
    /// Sorted by name
    pub components: Vec<ComponentHealth>,
    pub in_flight_messages: u64,
    /// Notifications fully handled and deleted from the channel
    pub messages_acknowledged: u64,
    /// Registrations per second over the last minute
    pub registrations_per_sec: f64,
}

struct ComponentState {
    status: HealthStatus,
    message: Option<String>,
    updated_at: DateTime<Utc>,
    healthy_at: Option<Instant>,
}

impl ComponentState {
    fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
            updated_at: Utc::now(),
            healthy_at: Some(Instant::now()),
        }
    }
}

/// Health registry shared between the pipeline and the metrics server
pub struct HealthCheck {
    started: Instant,
    components: RwLock<BTreeMap<String, ComponentState>>,
    in_flight: AtomicU64,
    acknowledged: AtomicU64,
    registrations: RwLock<VecDeque<Instant>>,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            components: RwLock::new(BTreeMap::new()),
            in_flight: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            registrations: RwLock::new(VecDeque::new()),
        }
    }

    /// Registry with the three ingestion components, all healthy.
    pub fn for_ingest() -> Self {
        let health = Self::new();
        for name in [
            COMPONENT_NOTIFICATIONS,
            COMPONENT_STORAGE,
            COMPONENT_REGISTRATION,
        ] {
            health.register_component(name);
        }
        health
    }

    pub fn register_component(&self, name: &str) {
        self.components
            .write()
            .insert(name.to_string(), ComponentState::healthy());
        debug!("Tracking health of {}", name);
    }

    /// Record a status change; transitions in and out of healthy are logged.
    pub fn update_component(&self, name: &str, status: HealthStatus, message: Option<&str>) {
        let mut components = self.components.write();
        let state = components
            .entry(name.to_string())
            .or_insert_with(ComponentState::healthy);

        let was = state.status;
        state.status = status;
        state.message = message.map(str::to_string);
        state.updated_at = Utc::now();
        if status == HealthStatus::Healthy {
            state.healthy_at = Some(Instant::now());
        }

        match (was, status) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => {}
            (HealthStatus::Healthy, _) => {
                warn!("{} is {:?}: {}", name, status, message.unwrap_or("no detail"))
            }
            (_, HealthStatus::Healthy) => info!("{} recovered", name),
            _ => {}
        }
    }

    pub fn mark_healthy(&self, name: &str) {
        self.update_component(name, HealthStatus::Healthy, None);
    }

    pub fn mark_degraded(&self, name: &str, message: &str) {
        self.update_component(name, HealthStatus::Degraded, Some(message));
    }

    pub fn mark_unhealthy(&self, name: &str, message: &str) {
        self.update_component(name, HealthStatus::Unhealthy, Some(message));
    }

    pub fn component_status(&self, name: &str) -> Option<HealthStatus> {
        self.components.read().get(name).map(|s| s.status)
    }

    pub fn message_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_finished(&self, acknowledged: bool) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if acknowledged {
            self.acknowledged.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_registration(&self) {
        let now = Instant::now();
        let mut registrations = self.registrations.write();
        registrations.push_back(now);
        while registrations
            .front()
            .is_some_and(|t| now.duration_since(*t) > RATE_WINDOW)
        {
            registrations.pop_front();
        }
    }

    pub fn registrations_per_sec(&self) -> f64 {
        let now = Instant::now();
        let recent = self
            .registrations
            .read()
            .iter()
            .filter(|t| now.duration_since(**t) <= RATE_WINDOW)
            .count();
        recent as f64 / RATE_WINDOW.as_secs_f64()
    }

    /// Worst status across components
    pub fn status(&self) -> HealthStatus {
        self.components
            .read()
            .values()
            .map(|s| s.status)
            .max()
            .unwrap_or_default()
    }

    pub fn report(&self) -> HealthReport {
        let now = Instant::now();
        let components = self
            .components
            .read()
            .iter()
            .map(|(name, state)| ComponentHealth {
                name: name.clone(),
                status: state.status,
                message: state.message.clone(),
                updated_at: state.updated_at,
                secs_since_healthy: state
                    .healthy_at
                    .map(|t| now.duration_since(t).as_secs_f64()),
            })
            .collect();

        HealthReport {
            status: self.status(),
            uptime_secs: self.started.elapsed().as_secs_f64(),
            components,
            in_flight_messages: self.in_flight.load(Ordering::Relaxed),
            messages_acknowledged: self.acknowledged.load(Ordering::Relaxed),
            registrations_per_sec: self.registrations_per_sec(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == HealthStatus::Healthy
    }

    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        self.status() < HealthStatus::Unhealthy
    }
}

impl std::fmt::Display for HealthReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "gateway {:?} (up {:.0}s, {} in flight, {} acknowledged, {:.2} registrations/s)",
            self.status,
            self.uptime_secs,
            self.in_flight_messages,
            self.messages_acknowledged,
            self.registrations_per_sec
        )?;
        for component in &self.components {
            match &component.message {
                Some(message) => {
                    writeln!(f, "  {:<14} {:?}: {}", component.name, component.status, message)?
                }
                None => writeln!(f, "  {:<14} {:?}", component.name, component.status)?,
            }
        }
        Ok(())
    }
}
