use crate::models::schedule::SeatKey;
use crate::pii::Masked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reservation status in the booking lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
    Failed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Failed => "FAILED",
        }
    }

    /// Statuses that occupy the seat.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReservationStatus::Pending),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            "EXPIRED" => Ok(ReservationStatus::Expired),
            "FAILED" => Ok(ReservationStatus::Failed),
            other => Err(format!("unknown reservation status: {}", other)),
        }
    }
}

/// Passenger identity as captured at booking time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassengerInfo {
    /// Account id of the passenger who made the booking.
    pub passenger_id: String,
    pub name: String,
    pub phone: Option<Masked<String>>,
    pub email: Option<String>,
    pub id_number: Option<Masked<String>>,
}

impl PassengerInfo {
    pub fn new(passenger_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            passenger_id: passenger_id.into(),
            name: name.into(),
            phone: None,
            email: None,
            id_number: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(Masked::new(phone.into()));
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_id_number(mut self, id_number: impl Into<String>) -> Self {
        self.id_number = Some(Masked::new(id_number.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[default]
    NkapPay,
    MtnMobileMoney,
    OrangeMoney,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::NkapPay => "NKAP_PAY",
            PaymentMethod::MtnMobileMoney => "MTN_MOBILE_MONEY",
            PaymentMethod::OrangeMoney => "ORANGE_MONEY",
            PaymentMethod::Card => "CARD",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NKAP_PAY" => Ok(PaymentMethod::NkapPay),
            "MTN_MOBILE_MONEY" => Ok(PaymentMethod::MtnMobileMoney),
            "ORANGE_MONEY" => Ok(PaymentMethod::OrangeMoney),
            "CARD" => Ok(PaymentMethod::Card),
            other => Err(format!("unknown payment method: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Success,
    Failed,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Success => "SUCCESS",
            PaymentOutcome::Failed => "FAILED",
        }
    }
}

impl FromStr for PaymentOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(PaymentOutcome::Success),
            "FAILED" => Ok(PaymentOutcome::Failed),
            other => Err(format!("unknown payment outcome: {}", other)),
        }
    }
}

/// One settlement attempt against a reservation. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub amount: i64,
    pub method: PaymentMethod,
    pub outcome: PaymentOutcome,
    pub external_reference: Option<String>,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentAttempt {
    pub fn succeeded(
        reservation_id: Uuid,
        amount: i64,
        method: PaymentMethod,
        external_reference: Option<String>,
        transaction_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reservation_id,
            amount,
            method,
            outcome: PaymentOutcome::Success,
            external_reference,
            transaction_id,
            failure_reason: None,
            created_at: at,
        }
    }

    pub fn failed(
        reservation_id: Uuid,
        amount: i64,
        method: PaymentMethod,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reservation_id,
            amount,
            method,
            outcome: PaymentOutcome::Failed,
            external_reference: None,
            transaction_id: None,
            failure_reason: Some(reason.into()),
            created_at: at,
        }
    }
}

/// A seat hold or booking on one scheduled trip. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: Uuid,
    pub booking_reference: String,
    pub schedule_id: Uuid,
    pub seat_id: Uuid,
    pub passenger: PassengerInfo,
    pub amount: i64,
    pub currency: String,
    pub status: ReservationStatus,
    pub hold_expiry: DateTime<Utc>,
    pub payments: Vec<PaymentAttempt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// New PENDING hold. `amount` and `currency` are the schedule's at creation time.
    pub fn hold(
        id: Uuid,
        key: SeatKey,
        passenger: PassengerInfo,
        amount: i64,
        currency: String,
        now: DateTime<Utc>,
        hold_expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            booking_reference: generate_booking_reference(),
            schedule_id: key.schedule_id,
            seat_id: key.seat_id,
            passenger,
            amount,
            currency,
            status: ReservationStatus::Pending,
            hold_expiry,
            payments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn seat_key(&self) -> SeatKey {
        SeatKey::new(self.schedule_id, self.seat_id)
    }

    /// PENDING with a hold that has run out at `now`.
    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && now >= self.hold_expiry
    }

    pub fn successful_payment(&self) -> Option<&PaymentAttempt> {
        self.payments
            .iter()
            .find(|p| p.outcome == PaymentOutcome::Success)
    }

    /// Apply a status change locally. Callers are expected to have checked the transition.
    pub fn apply(&mut self, next: ReservationStatus, attempt: Option<PaymentAttempt>, at: DateTime<Utc>) {
        self.status = next;
        if let Some(attempt) = attempt {
            self.payments.push(attempt);
        }
        self.updated_at = at;
    }
}

/// `CB` followed by eight uppercase hex characters.
pub fn generate_booking_reference() -> String {
    let raw = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("CB{}", &raw[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending() -> Reservation {
        let now = Utc::now();
        Reservation::hold(
            Uuid::new_v4(),
            SeatKey::new(Uuid::new_v4(), Uuid::new_v4()),
            PassengerInfo::new("user-1", "Ngono Marie").with_phone("+237670000000"),
            7_500,
            "XAF".to_string(),
            now,
            now + Duration::minutes(15),
        )
    }

    #[test]
    fn test_transition_table() {
        use ReservationStatus::*;

        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Expired));
        assert!(Confirmed.can_transition_to(Cancelled));

        assert!(!Confirmed.can_transition_to(Expired));
        assert!(!Failed.can_transition_to(Confirmed));
        assert!(!Expired.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn test_hold_lapses_only_while_pending() {
        let mut reservation = pending();
        let later = reservation.hold_expiry + Duration::seconds(1);

        assert!(!reservation.hold_lapsed(reservation.created_at));
        assert!(reservation.hold_lapsed(reservation.hold_expiry));
        assert!(reservation.hold_lapsed(later));

        reservation.apply(ReservationStatus::Confirmed, None, later);
        assert!(!reservation.hold_lapsed(later));
    }

    #[test]
    fn test_apply_records_attempt() {
        let mut reservation = pending();
        let now = Utc::now();
        let attempt = PaymentAttempt::succeeded(
            reservation.id,
            reservation.amount,
            PaymentMethod::default(),
            Some("NKAP123".to_string()),
            Some("TXN123".to_string()),
            now,
        );

        reservation.apply(ReservationStatus::Confirmed, Some(attempt.clone()), now);

        assert_eq!(reservation.status, ReservationStatus::Confirmed);
        assert_eq!(reservation.successful_payment(), Some(&attempt));
        assert_eq!(reservation.updated_at, now);
    }

    #[test]
    fn test_booking_reference_format() {
        let reference = generate_booking_reference();
        assert_eq!(reference.len(), 10);
        assert!(reference.starts_with("CB"));
        assert!(reference[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_passenger_pii_masked_in_debug() {
        let reservation = pending();
        let debug = format!("{:?}", reservation.passenger);
        assert!(!debug.contains("670000000"));
        assert!(debug.contains("Ngono Marie"));
    }
}
