//! Baby Buddy tracking payloads built by the flow layer.

#[cfg(test)]
mod tests;

use core::fmt::Write;

use heapless::{String, Vec};
use serde::{Deserialize, Serialize, Serializer, ser::Error as _};

use crate::{
    queue::{ActionRequest, PAYLOAD_BYTES, Payload, Resource},
    time::{self, Timestamp, parse_timestamp},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PayloadError {
    /// The feeding method does not apply to the food type.
    InvalidMethod,
    /// Serialized body does not fit a queue record.
    TooLarge,
}

impl From<serde_json_core::ser::Error> for PayloadError {
    fn from(_: serde_json_core::ser::Error) -> Self {
        Self::TooLarge
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum FoodType {
    #[serde(rename = "breast milk")]
    BreastMilk,
    #[serde(rename = "fortified breast milk")]
    FortifiedBreastMilk,
    #[serde(rename = "formula")]
    Formula,
    #[serde(rename = "solid food")]
    SolidFood,
}

impl FoodType {
    pub const ALL: [FoodType; 4] = [
        FoodType::BreastMilk,
        FoodType::FortifiedBreastMilk,
        FoodType::Formula,
        FoodType::SolidFood,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::BreastMilk => "Breast milk",
            Self::FortifiedBreastMilk => "Fort. breast milk",
            Self::Formula => "Formula",
            Self::SolidFood => "Solid food",
        }
    }

    pub const fn methods(self) -> &'static [FeedingMethod] {
        match self {
            Self::BreastMilk => &[
                FeedingMethod::LeftBreast,
                FeedingMethod::RightBreast,
                FeedingMethod::BothBreasts,
                FeedingMethod::Bottle,
            ],
            Self::FortifiedBreastMilk | Self::Formula => &[FeedingMethod::Bottle],
            Self::SolidFood => &[FeedingMethod::ParentFed, FeedingMethod::SelfFed],
        }
    }

    pub fn allows(self, method: FeedingMethod) -> bool {
        self.methods().contains(&method)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FeedingMethod {
    #[serde(rename = "left breast")]
    LeftBreast,
    #[serde(rename = "right breast")]
    RightBreast,
    #[serde(rename = "both breasts")]
    BothBreasts,
    #[serde(rename = "bottle")]
    Bottle,
    #[serde(rename = "parent fed")]
    ParentFed,
    #[serde(rename = "self fed")]
    SelfFed,
}

impl FeedingMethod {
    const ALL: [FeedingMethod; 6] = [
        FeedingMethod::LeftBreast,
        FeedingMethod::RightBreast,
        FeedingMethod::BothBreasts,
        FeedingMethod::Bottle,
        FeedingMethod::ParentFed,
        FeedingMethod::SelfFed,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::LeftBreast => "L. breast",
            Self::RightBreast => "R. breast",
            Self::BothBreasts => "Both breasts",
            Self::Bottle => "Bottle",
            Self::ParentFed => "Parent-fed",
            Self::SelfFed => "Self-fed",
        }
    }

    pub(crate) const fn code(self) -> u8 {
        match self {
            Self::LeftBreast => 1,
            Self::RightBreast => 2,
            Self::BothBreasts => 3,
            Self::Bottle => 4,
            Self::ParentFed => 5,
            Self::SelfFed => 6,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }
}

/// Most recent feeding, shown on the main menu.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FeedingSummary {
    pub method: FeedingMethod,
    pub ended_at: Timestamp,
}

impl FeedingSummary {
    /// Reads one feeding object, using `end`, then `start`, then `fallback`.
    pub fn from_payload(body: &[u8], fallback: Option<Timestamp>) -> Option<Self> {
        let (fields, _) = serde_json_core::from_slice::<FeedingFields<'_>>(body).ok()?;
        fields.summary(fallback)
    }

    /// Reads the newest feeding from a `feedings/?limit=1` page.
    pub fn from_page(body: &[u8]) -> Option<Self> {
        let (page, _) = serde_json_core::from_slice::<FeedingPage<'_>>(body).ok()?;
        page.results.first()?.summary(None)
    }
}

#[derive(Deserialize)]
struct FeedingFields<'a> {
    method: FeedingMethod,
    #[serde(default, borrow)]
    start: Option<&'a str>,
    #[serde(default, borrow)]
    end: Option<&'a str>,
}

impl FeedingFields<'_> {
    fn summary(&self, fallback: Option<Timestamp>) -> Option<FeedingSummary> {
        let ended_at = self
            .end
            .and_then(parse_timestamp)
            .or_else(|| self.start.and_then(parse_timestamp))
            .or(fallback)?;
        Some(FeedingSummary {
            method: self.method,
            ended_at,
        })
    }
}

#[derive(Deserialize)]
struct FeedingPage<'a> {
    #[serde(borrow)]
    results: Vec<FeedingFields<'a>, 1>,
}

#[derive(Deserialize)]
struct Created {
    id: u32,
}

/// `id` of the object a create or update response describes.
pub fn created_id(body: &[u8]) -> Option<u32> {
    serde_json_core::from_slice::<Created>(body)
        .ok()
        .map(|(created, _)| created.id)
}

/// Timestamp as Baby Buddy expects it, with an explicit offset.
struct Iso<'a>(&'a Timestamp);

impl Serialize for Iso<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut text = String::<40>::new();
        time::write_iso8601(&mut text, self.0).map_err(|_| S::Error::custom("timestamp"))?;
        serializer.serialize_str(&text)
    }
}

/// How a timed entry reports its duration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Timing {
    /// Locally measured start and end.
    Span { start: Timestamp, end: Timestamp },
    /// Server-side timer; Baby Buddy derives start and end from it.
    RemoteTimer(u32),
}

/// One trackable event that becomes a `Create` action.
pub trait TrackedEntry {
    fn resource(&self) -> Resource;
    /// Serializes the entry with `notes` into `out`, returning the length.
    fn to_json(&self, notes: &str, out: &mut [u8]) -> Result<usize, PayloadError>;
}

/// `start`/`end` or `timer`, whichever the timing carries.
struct TimingFields<'a> {
    start: Option<Iso<'a>>,
    end: Option<Iso<'a>>,
    timer: Option<u32>,
}

impl<'a> From<&'a Timing> for TimingFields<'a> {
    fn from(timing: &'a Timing) -> Self {
        match timing {
            Timing::Span { start, end } => Self {
                start: Some(Iso(start)),
                end: Some(Iso(end)),
                timer: None,
            },
            Timing::RemoteTimer(id) => Self {
                start: None,
                end: None,
                timer: Some(*id),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Feeding {
    pub child_id: u32,
    pub food_type: FoodType,
    pub method: FeedingMethod,
    pub timing: Timing,
}

impl Feeding {
    pub fn new(
        child_id: u32,
        food_type: FoodType,
        method: FeedingMethod,
        timing: Timing,
    ) -> Result<Self, PayloadError> {
        if !food_type.allows(method) {
            return Err(PayloadError::InvalidMethod);
        }
        Ok(Self {
            child_id,
            food_type,
            method,
            timing,
        })
    }
}

#[derive(Serialize)]
struct FeedingBody<'a> {
    child: u32,
    #[serde(rename = "type")]
    food_type: FoodType,
    method: FeedingMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<Iso<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<Iso<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timer: Option<u32>,
    notes: &'a str,
}

impl TrackedEntry for Feeding {
    fn resource(&self) -> Resource {
        Resource::Feeding
    }

    fn to_json(&self, notes: &str, out: &mut [u8]) -> Result<usize, PayloadError> {
        let TimingFields { start, end, timer } = TimingFields::from(&self.timing);
        let body = FeedingBody {
            child: self.child_id,
            food_type: self.food_type,
            method: self.method,
            start,
            end,
            timer,
            notes,
        };
        Ok(serde_json_core::to_slice(&body, out)?)
    }
}

/// Wet and solid are independent; both false is allowed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiaperChange {
    pub child_id: u32,
    pub wet: bool,
    pub solid: bool,
    pub time: Timestamp,
}

#[derive(Serialize)]
struct DiaperChangeBody<'a> {
    child: u32,
    wet: bool,
    solid: bool,
    time: Iso<'a>,
    notes: &'a str,
}

impl TrackedEntry for DiaperChange {
    fn resource(&self) -> Resource {
        Resource::DiaperChange
    }

    fn to_json(&self, notes: &str, out: &mut [u8]) -> Result<usize, PayloadError> {
        let body = DiaperChangeBody {
            child: self.child_id,
            wet: self.wet,
            solid: self.solid,
            time: Iso(&self.time),
            notes,
        };
        Ok(serde_json_core::to_slice(&body, out)?)
    }
}

/// Pumped amount is unitless, like Baby Buddy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pumping {
    pub child_id: u32,
    pub amount: f32,
    pub timing: Timing,
}

#[derive(Serialize)]
struct PumpingBody<'a> {
    child: u32,
    amount: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<Iso<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<Iso<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timer: Option<u32>,
    notes: &'a str,
}

impl TrackedEntry for Pumping {
    fn resource(&self) -> Resource {
        Resource::Pumping
    }

    fn to_json(&self, notes: &str, out: &mut [u8]) -> Result<usize, PayloadError> {
        let TimingFields { start, end, timer } = TimingFields::from(&self.timing);
        let body = PumpingBody {
            child: self.child_id,
            amount: self.amount,
            start,
            end,
            timer,
            notes,
        };
        Ok(serde_json_core::to_slice(&body, out)?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TummyTime {
    pub child_id: u32,
    pub timing: Timing,
}

#[derive(Serialize)]
struct TimedBody<'a> {
    child: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    nap: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<Iso<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<Iso<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timer: Option<u32>,
    notes: &'a str,
}

impl<'a> TimedBody<'a> {
    fn new(child: u32, nap: Option<bool>, timing: &'a Timing, notes: &'a str) -> Self {
        let TimingFields { start, end, timer } = TimingFields::from(timing);
        Self {
            child,
            nap,
            start,
            end,
            timer,
            notes,
        }
    }
}

impl TrackedEntry for TummyTime {
    fn resource(&self) -> Resource {
        Resource::TummyTime
    }

    fn to_json(&self, notes: &str, out: &mut [u8]) -> Result<usize, PayloadError> {
        let body = TimedBody::new(self.child_id, None, &self.timing, notes);
        Ok(serde_json_core::to_slice(&body, out)?)
    }
}

/// `nap: None` lets Baby Buddy classify the sleep from its settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sleep {
    pub child_id: u32,
    pub nap: Option<bool>,
    pub timing: Timing,
}

impl TrackedEntry for Sleep {
    fn resource(&self) -> Resource {
        Resource::Sleep
    }

    fn to_json(&self, notes: &str, out: &mut [u8]) -> Result<usize, PayloadError> {
        let body = TimedBody::new(self.child_id, self.nap, &self.timing, notes);
        Ok(serde_json_core::to_slice(&body, out)?)
    }
}

/// Serializes `entry` with notes naming the device, plus any extra lines.
pub fn build_request<E: TrackedEntry>(
    entry: &E,
    device_name: &str,
    extra_notes: &[&str],
) -> Result<ActionRequest, PayloadError> {
    let mut notes = String::<PAYLOAD_BYTES>::new();
    notes.push_str(device_name).map_err(|()| PayloadError::TooLarge)?;
    for line in extra_notes {
        write!(notes, "\n{}", line).map_err(|_| PayloadError::TooLarge)?;
    }

    let mut body = [0u8; PAYLOAD_BYTES];
    let len = entry.to_json(&notes, &mut body)?;
    let payload = Payload::from_slice(&body[..len]).map_err(|()| PayloadError::TooLarge)?;
    Ok(ActionRequest::create(entry.resource(), payload))
}
