#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};

use saferide_config::AppConfig;
use saferide_dispatcher::{EtaResolver, RequestService};
use saferide_domain::ports::Clock;
use saferide_domain::store::{DocumentStore, DocumentStoreExt, Versioned};
use saferide_domain::{DriverSession, Member, Request};
use saferide_infrastructure::InMemoryDocumentStore;
use saferide_testing_utils::{seed, FakeClock, MemberBuilder, RecordingNotifier};

pub const GROUP: &str = "group-1";

pub struct Harness {
    pub store: Arc<InMemoryDocumentStore>,
    pub clock: Arc<FakeClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub service: RequestService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default(), InMemoryDocumentStore::default())
    }

    pub fn with_config(config: AppConfig, store: InMemoryDocumentStore) -> Self {
        let store = Arc::new(store);
        let clock = Arc::new(FakeClock::at_default_start());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = RequestService::new(
            store.clone(),
            clock.clone(),
            notifier.clone(),
            EtaResolver::fallback_only(config.external.default_eta_minutes),
            &config,
        );
        Self {
            store,
            clock,
            notifier,
            service,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn dyn_store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    pub async fn seed_members(&self, members: &[Member]) {
        seed(self.store.as_ref(), members).await.unwrap();
    }

    /// 分组内的一名管理员
    pub async fn seed_admin(&self, id: &str) -> Member {
        let admin = MemberBuilder::new().with_id(id).with_group(GROUP).admin().build();
        self.seed_members(std::slice::from_ref(&admin)).await;
        admin
    }

    pub async fn seed_rider(&self, id: &str, tier: u32) -> Member {
        let rider = MemberBuilder::new()
            .with_id(id)
            .with_group(GROUP)
            .with_tier(tier)
            .build();
        self.seed_members(std::slice::from_ref(&rider)).await;
        rider
    }

    /// 登记司机并开始值班
    pub async fn start_driver(&self, id: &str) -> DriverSession {
        self.seed_rider(id, 3).await;
        self.service.open_driver_session(id, GROUP).await.unwrap()
    }

    pub async fn request(&self, id: &str) -> Versioned<Request> {
        self.store.fetch::<Request>(id).await.unwrap().unwrap()
    }

    pub async fn member(&self, id: &str) -> Option<Versioned<Member>> {
        self.store.fetch::<Member>(id).await.unwrap()
    }

    pub async fn session(&self, session_id: &str) -> Versioned<DriverSession> {
        self.store.fetch::<DriverSession>(session_id).await.unwrap().unwrap()
    }
}
