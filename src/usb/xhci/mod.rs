//! The xHCI host controller stack (spec §4.5): ring cycle-bit
//! mechanics, slot/event/command management, endpoint transfer-TRB
//! construction, and the device initialization sequence.

pub mod device;
pub mod endpoint;
pub mod manager;
pub mod ring;
pub mod trb;

pub use device::{append_route_tier, EndpointContextFields, InitSequence, InitStep, SlotContextFields};
pub use manager::{CommandRing, Event, EventManager, SlotManager, MAX_SLOTS};
pub use ring::{EventRing, ProducerRing};
pub use trb::{CompletionCode, Trb, TrbType};
