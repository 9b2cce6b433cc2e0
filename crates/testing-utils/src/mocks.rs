//! Test doubles for the collaborator ports
//!
//! The clock, notifier and routing service are the only things the dispatch
//! engine reaches outside the document store for. These doubles make them
//! deterministic and observable.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use saferide_domain::entities::{AlertRecord, AlertType, GeoPoint};
use saferide_domain::ports::{Clock, NotificationService, RoutingService};
use saferide_errors::{DispatchError, DispatchResult};

/// Manually driven clock
#[derive(Debug, Clone)]
pub struct FakeClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// 2026-09-01 08:00 UTC, a fixed start so tests do not depend on wall time
    pub fn at_default_start() -> Self {
        Self::new(Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).unwrap())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance_minutes(&self, minutes: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::minutes(minutes);
    }

    pub fn advance_seconds(&self, seconds: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::seconds(seconds);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Notifier that records every delivered alert
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    delivered: Arc<Mutex<Vec<AlertRecord>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn delivered(&self) -> Vec<AlertRecord> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn count_of(&self, alert_type: AlertType) -> usize {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.alert_type == alert_type)
            .count()
    }

    pub fn clear(&self) {
        self.delivered.lock().unwrap().clear();
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn deliver(&self, alert: &AlertRecord) -> DispatchResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(DispatchError::ExternalService(
                "recording notifier configured to fail".to_string(),
            ));
        }
        self.delivered.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Routing service that replays a script of responses
///
/// Once the script is exhausted every call returns `fallback`.
#[derive(Debug, Clone)]
pub struct ScriptedRoutingService {
    script: Arc<Mutex<VecDeque<DispatchResult<u32>>>>,
    fallback: DispatchResult<u32>,
    delay: Option<Duration>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedRoutingService {
    pub fn always(minutes: u32) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Ok(minutes),
            delay: None,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn always_failing() -> Self {
        Self {
            fallback: Err(DispatchError::ExternalService("routing unavailable".to_string())),
            ..Self::always(0)
        }
    }

    pub fn with_script(responses: Vec<DispatchResult<u32>>, fallback: u32) -> Self {
        Self {
            script: Arc::new(Mutex::new(responses.into())),
            ..Self::always(fallback)
        }
    }

    /// Every call sleeps before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl RoutingService for ScriptedRoutingService {
    async fn travel_minutes(&self, _from: &GeoPoint, _to: &GeoPoint) -> DispatchResult<u32> {
        *self.calls.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_clock_advances() {
        let clock = FakeClock::at_default_start();
        let start = clock.now();
        clock.advance_minutes(30);
        assert_eq!(clock.now() - start, chrono::Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_scripted_routing_replays_then_falls_back() {
        let routing = ScriptedRoutingService::with_script(
            vec![Ok(4), Err(DispatchError::ExternalService("down".to_string()))],
            9,
        );
        let p = GeoPoint { lat: 0.0, lng: 0.0 };
        assert_eq!(routing.travel_minutes(&p, &p).await.unwrap(), 4);
        assert!(routing.travel_minutes(&p, &p).await.is_err());
        assert_eq!(routing.travel_minutes(&p, &p).await.unwrap(), 9);
        assert_eq!(routing.calls(), 3);
    }
}
