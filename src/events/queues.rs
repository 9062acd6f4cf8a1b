use std::sync::mpsc::{Receiver, Sender, channel};

use log::debug;

use crate::events::{AvatarUpdate, BlockUpdate, FullUpdate, Kill, NameReply, NewObject, PropertyReply, TerseUpdate};

/// Producer half, cloned onto every network callback thread. Enqueueing never
/// blocks; once the consumer is gone (teardown) events are silently dropped.
#[derive(Clone)]
pub struct EventSink {
    new_objects: Sender<NewObject>,
    full_updates: Sender<FullUpdate>,
    terse_updates: Sender<TerseUpdate>,
    block_updates: Sender<BlockUpdate>,
    kills: Sender<Kill>,
    avatar_updates: Sender<AvatarUpdate>,
    name_replies: Sender<NameReply>,
    property_replies: Sender<PropertyReply>,
}

macro_rules! push_impl {
    ($fn_name:ident, $field:ident, $ty:ty) => {
        pub fn $fn_name(&self, event: $ty) {
            if self.$field.send(event).is_err() {
                debug!("Dropping {} event after shutdown", stringify!($field));
            }
        }
    };
}

impl EventSink {
    push_impl!(push_new_object, new_objects, NewObject);
    push_impl!(push_full_update, full_updates, FullUpdate);
    push_impl!(push_terse_update, terse_updates, TerseUpdate);
    push_impl!(push_block_update, block_updates, BlockUpdate);
    push_impl!(push_kill, kills, Kill);
    push_impl!(push_avatar_update, avatar_updates, AvatarUpdate);
    push_impl!(push_name_reply, name_replies, NameReply);
    push_impl!(push_property_reply, property_replies, PropertyReply);
}

/// Consumer half, owned by the frame dispatcher. One FIFO per event category;
/// the per-frame caps live with the dispatcher, not the queues.
pub struct EventQueues {
    pub new_objects: Receiver<NewObject>,
    pub full_updates: Receiver<FullUpdate>,
    pub terse_updates: Receiver<TerseUpdate>,
    pub block_updates: Receiver<BlockUpdate>,
    pub kills: Receiver<Kill>,
    pub avatar_updates: Receiver<AvatarUpdate>,
    pub name_replies: Receiver<NameReply>,
    pub property_replies: Receiver<PropertyReply>,
}

pub fn event_channels() -> (EventSink, EventQueues) {
    let (new_objects_tx, new_objects_rx) = channel();
    let (full_updates_tx, full_updates_rx) = channel();
    let (terse_updates_tx, terse_updates_rx) = channel();
    let (block_updates_tx, block_updates_rx) = channel();
    let (kills_tx, kills_rx) = channel();
    let (avatar_updates_tx, avatar_updates_rx) = channel();
    let (name_replies_tx, name_replies_rx) = channel();
    let (property_replies_tx, property_replies_rx) = channel();

    (
        EventSink {
            new_objects: new_objects_tx,
            full_updates: full_updates_tx,
            terse_updates: terse_updates_tx,
            block_updates: block_updates_tx,
            kills: kills_tx,
            avatar_updates: avatar_updates_tx,
            name_replies: name_replies_tx,
            property_replies: property_replies_tx,
        },
        EventQueues {
            new_objects: new_objects_rx,
            full_updates: full_updates_rx,
            terse_updates: terse_updates_rx,
            block_updates: block_updates_rx,
            kills: kills_rx,
            avatar_updates: avatar_updates_rx,
            name_replies: name_replies_rx,
            property_replies: property_replies_rx,
        },
    )
}

/// Dequeues up to `cap` items (`usize::MAX` drains fully) and applies `apply`
/// to each. Items beyond the cap stay queued for the next frame: bounded
/// staleness instead of unbounded main-thread work.
pub fn drain<T>(receiver: &Receiver<T>, cap: usize, mut apply: impl FnMut(T)) -> usize {
    let mut drained = 0;
    while drained < cap {
        match receiver.try_recv() {
            Ok(event) => {
                apply(event);
                drained += 1;
            }
            Err(_) => break,
        }
    }
    drained
}
