use core::fmt;

use heapless::Vec;

use crate::{
    storage::{
        StorageError,
        codec::{Reader, Writer},
    },
    time::{self, Timestamp},
};

/// Largest request body carried by one buffered action.
pub const PAYLOAD_BYTES: usize = 384;

pub type Payload = Vec<u8, PAYLOAD_BYTES>;

/// Monotonic position of a record in the log, never reused.
pub type Sequence = u32;

const RECORD_MAGIC: [u8; 4] = *b"BPQ1";
const RECORD_VERSION: u8 = 2;

/// Baby Buddy endpoint an action targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resource {
    Feeding,
    DiaperChange,
    Pumping,
    TummyTime,
    Sleep,
    Timer,
    Note,
}

impl Resource {
    /// Path segment under `/api/`.
    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::Feeding => "feedings",
            Self::DiaperChange => "changes",
            Self::Pumping => "pumping",
            Self::TummyTime => "tummy-times",
            Self::Sleep => "sleep",
            Self::Timer => "timers",
            Self::Note => "notes",
        }
    }

    const fn code(self) -> u8 {
        match self {
            Self::Feeding => 1,
            Self::DiaperChange => 2,
            Self::Pumping => 3,
            Self::TummyTime => 4,
            Self::Sleep => 5,
            Self::Timer => 6,
            Self::Note => 7,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Feeding,
            2 => Self::DiaperChange,
            3 => Self::Pumping,
            4 => Self::TummyTime,
            5 => Self::Sleep,
            6 => Self::Timer,
            7 => Self::Note,
            _ => return None,
        })
    }
}

/// Mutation applied to a resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    Create,
    Update { id: u32 },
    Delete { id: u32 },
}

impl Action {
    pub const fn object_id(self) -> Option<u32> {
        match self {
            Self::Create => None,
            Self::Update { id } | Self::Delete { id } => Some(id),
        }
    }

    fn encode(self) -> (u8, u32) {
        match self {
            Self::Create => (1, 0),
            Self::Update { id } => (2, id),
            Self::Delete { id } => (3, id),
        }
    }

    fn decode(kind: u8, id: u32) -> Option<Self> {
        Some(match kind {
            1 => Self::Create,
            2 => Self::Update { id },
            3 => Self::Delete { id },
            _ => return None,
        })
    }
}

/// A mutating action as requested by the flow layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActionRequest {
    pub resource: Resource,
    pub action: Action,
    pub payload: Payload,
}

impl ActionRequest {
    pub fn create(resource: Resource, payload: Payload) -> Self {
        Self {
            resource,
            action: Action::Create,
            payload,
        }
    }
}

/// Names one buffered action across every retry of its replay.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IdempotencyKey {
    pub origin: u32,
    pub sequence: Sequence,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}-{}", self.origin, self.sequence)
    }
}

/// One buffered action, immutable once appended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueueRecord {
    pub sequence: Sequence,
    /// Boot nonce of the session that captured the action.
    pub origin: u32,
    pub resource: Resource,
    pub action: Action,
    pub payload: Payload,
    /// Local time the action was captured, used as its effective time.
    pub captured_at: Timestamp,
}

impl QueueRecord {
    pub const fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey {
            origin: self.origin,
            sequence: self.sequence,
        }
    }

    pub(super) fn encode(&self, buf: &mut [u8]) -> Result<usize, StorageError> {
        let (kind, id) = self.action.encode();
        let mut w = Writer::new(buf, RECORD_MAGIC, RECORD_VERSION)?;
        w.u32(self.sequence)?;
        w.u32(self.origin)?;
        w.u8(self.resource.code())?;
        w.u8(kind)?;
        w.u32(id)?;
        w.i64(self.captured_at.timestamp())?;
        w.i16(time::offset_minutes(*self.captured_at.offset()))?;
        w.u16(self.payload.len() as u16)?;
        w.bytes(&self.payload)?;
        w.seal()
    }

    pub(super) fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut r = Reader::open(bytes, RECORD_MAGIC, RECORD_VERSION)?;
        let sequence = r.u32()?;
        let origin = r.u32()?;
        let resource = Resource::from_code(r.u8()?).ok_or(StorageError::Corrupt)?;
        let kind = r.u8()?;
        let action = Action::decode(kind, r.u32()?).ok_or(StorageError::Corrupt)?;
        let secs = r.i64()?;
        let captured_at = time::from_unix(secs, r.i16()?).ok_or(StorageError::Corrupt)?;
        let len = usize::from(r.u16()?);
        let payload = Vec::from_slice(r.bytes(len)?).map_err(|_| StorageError::Corrupt)?;
        r.finish()?;

        Ok(Self {
            sequence,
            origin,
            resource,
            action,
            payload,
            captured_at,
        })
    }
}
