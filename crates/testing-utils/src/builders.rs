//! Test data builders for creating test entities
//!
//! Builders start from sensible defaults so a test only spells out the
//! fields it actually cares about.

use chrono::{DateTime, Utc};
use saferide_domain::entities::{
    DriverSession, GeoPoint, Member, Pickup, Request, RequestStatus, Role,
};
use uuid::Uuid;

pub fn sample_pickup() -> Pickup {
    Pickup {
        location: GeoPoint {
            lat: 39.9612,
            lng: -82.9988,
        },
        address: "100 Campus Ave".to_string(),
    }
}

/// Builder for creating test Request entities
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            request: Request::new(
                "group-1".to_string(),
                "member-1".to_string(),
                1,
                sample_pickup(),
                10.0,
                Utc::now(),
            ),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.request.id = id.to_string();
        self
    }

    pub fn with_group(mut self, group_id: &str) -> Self {
        self.request.group_id = group_id.to_string();
        self
    }

    pub fn with_requester(mut self, requester_id: &str, tier: u32) -> Self {
        self.request.requester_id = requester_id.to_string();
        self.request.requester_tier = tier;
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.request.priority = priority;
        self
    }

    pub fn with_requested_at(mut self, requested_at: DateTime<Utc>) -> Self {
        self.request.requested_at = requested_at;
        self
    }

    pub fn emergency(mut self, reason: &str) -> Self {
        self.request.is_emergency = true;
        self.request.priority = saferide_domain::SENTINEL_PRIORITY;
        self.request.reason = Some(reason.to_string());
        self
    }

    /// Bound to the driver at the request's own creation time
    pub fn bound_to(mut self, driver_id: &str) -> Self {
        self.request.status = RequestStatus::Bound;
        self.request.driver_id = Some(driver_id.to_string());
        self.request.bound_at = Some(self.request.requested_at);
        self
    }

    pub fn en_route_with(mut self, driver_id: &str) -> Self {
        self = self.bound_to(driver_id);
        self.request.status = RequestStatus::EnRoute;
        self.request.enroute_at = self.request.bound_at;
        self.request.eta_minutes = Some(10);
        self
    }

    pub fn completed_by(mut self, driver_id: &str) -> Self {
        self = self.en_route_with(driver_id);
        self.request.status = RequestStatus::Completed;
        self.request.completed_at = self.request.enroute_at;
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test DriverSession entities
pub struct DriverSessionBuilder {
    session: DriverSession,
}

impl DriverSessionBuilder {
    pub fn new(driver_id: &str) -> Self {
        Self {
            session: DriverSession::new(driver_id.to_string(), "group-1".to_string(), Utc::now()),
        }
    }

    pub fn with_group(mut self, group_id: &str) -> Self {
        self.session.group_id = group_id.to_string();
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.session.started_at = started_at;
        self.session.last_available_at = Some(started_at);
        self
    }

    pub fn unavailable_since(mut self, since: DateTime<Utc>) -> Self {
        self.session.available = false;
        self.session.last_unavailable_at = Some(since);
        self
    }

    pub fn with_toggle_count(mut self, toggle_count: u32) -> Self {
        self.session.toggle_count = toggle_count;
        self
    }

    pub fn with_last_reset_at(mut self, reset_at: DateTime<Utc>) -> Self {
        self.session.last_reset_at = Some(reset_at);
        self
    }

    pub fn with_completed_count(mut self, completed_count: u64) -> Self {
        self.session.completed_count = completed_count;
        self
    }

    pub fn closed_at(mut self, ended_at: DateTime<Utc>) -> Self {
        self.session.ended_at = Some(ended_at);
        self
    }

    pub fn build(self) -> DriverSession {
        self.session
    }
}

/// Builder for creating test Member entities
pub struct MemberBuilder {
    member: Member,
}

impl MemberBuilder {
    pub fn new() -> Self {
        Self {
            member: Member {
                id: Uuid::new_v4().to_string(),
                group_id: "group-1".to_string(),
                display_name: "Test Member".to_string(),
                tier: 1,
                role: Role::Member,
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.member.id = id.to_string();
        self
    }

    pub fn with_group(mut self, group_id: &str) -> Self {
        self.member.group_id = group_id.to_string();
        self
    }

    pub fn with_name(mut self, display_name: &str) -> Self {
        self.member.display_name = display_name.to_string();
        self
    }

    pub fn with_tier(mut self, tier: u32) -> Self {
        self.member.tier = tier;
        self
    }

    pub fn admin(mut self) -> Self {
        self.member.role = Role::Admin;
        self
    }

    pub fn build(self) -> Member {
        self.member
    }
}

impl Default for MemberBuilder {
    fn default() -> Self {
        Self::new()
    }
}
