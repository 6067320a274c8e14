use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatClass {
    Standard,
    Vip,
}

impl SeatClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatClass::Standard => "STANDARD",
            SeatClass::Vip => "VIP",
        }
    }
}

impl FromStr for SeatClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STANDARD" => Ok(SeatClass::Standard),
            "VIP" => Ok(SeatClass::Vip),
            other => Err(format!("unknown seat class: {}", other)),
        }
    }
}

/// A physical seat on a bus. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seat {
    pub id: Uuid,
    pub bus_id: Uuid,
    pub seat_number: u16,
    pub seat_class: SeatClass,
}

impl Seat {
    pub fn new(bus_id: Uuid, seat_number: u16, seat_class: SeatClass) -> Self {
        Self {
            id: Uuid::new_v4(),
            bus_id,
            seat_number,
            seat_class,
        }
    }

    /// Standard seat map for a bus: seats numbered 1..=count, the first `vip` of them VIP.
    pub fn layout(bus_id: Uuid, count: u16, vip: u16) -> Vec<Seat> {
        (1..=count)
            .map(|n| {
                let class = if n <= vip { SeatClass::Vip } else { SeatClass::Standard };
                Seat::new(bus_id, n, class)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Cancelled,
    Departed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Cancelled => "cancelled",
            ScheduleStatus::Departed => "departed",
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ScheduleStatus::Scheduled),
            "cancelled" => Ok(ScheduleStatus::Cancelled),
            "departed" => Ok(ScheduleStatus::Departed),
            other => Err(format!("unknown schedule status: {}", other)),
        }
    }
}

/// A bus running a route at a specific departure time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    pub id: Uuid,
    pub route_id: Uuid,
    pub bus_id: Uuid,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    /// Minor currency units.
    pub price: i64,
    pub currency: String,
    pub total_seats: u32,
    pub status: ScheduleStatus,
}

impl Schedule {
    pub fn new(
        route_id: Uuid,
        bus_id: Uuid,
        departure_time: DateTime<Utc>,
        arrival_time: DateTime<Utc>,
        price: i64,
        total_seats: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            route_id,
            bus_id,
            departure_time,
            arrival_time,
            price,
            currency: "XAF".to_string(),
            total_seats,
            status: ScheduleStatus::Scheduled,
        }
    }

    /// Scheduled and not yet departed at `now`.
    pub fn is_bookable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Scheduled && self.departure_time > now
    }
}

/// The reservation slot a hold or booking occupies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SeatKey {
    pub schedule_id: Uuid,
    pub seat_id: Uuid,
}

impl SeatKey {
    pub fn new(schedule_id: Uuid, seat_id: Uuid) -> Self {
        Self { schedule_id, seat_id }
    }
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schedule_id, self.seat_id)
    }
}
