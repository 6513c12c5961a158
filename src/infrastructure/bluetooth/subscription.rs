//! Subscription Manager
//!
//! Subscribes and unsubscribes the logical channels of a connected device.
//! A failed subscribe is diagnosed against the device's discovered
//! characteristics so the caller can tell a missing service apart from a
//! radio or transport fault.

use crate::domain::buffer::InboundBuffer;
use crate::domain::models::{Channel, ChannelSet, UartEvent};
use crate::error::UartError;
use crate::infrastructure::bluetooth::protocol::channel_uuid;
use crate::infrastructure::bluetooth::registry::CharacteristicCache;
use crate::infrastructure::bluetooth::transport::{DeviceLink, NotificationCallback};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, trace};

/// Callback that queues every TX notification into `inbound`.
pub fn inbound_callback(
    inbound: InboundBuffer,
    events: Option<mpsc::UnboundedSender<UartEvent>>,
) -> NotificationCallback {
    Arc::new(move |handle, data| {
        trace!("Notification on {}: {} bytes", handle, data.len());
        inbound.receive(data);
        if let Some(sender) = &events {
            let _ = sender.send(UartEvent::DataReceived(data.len()));
        }
    })
}

/// Subscribe one channel. TX registers `callback`; RX subscribes without one
/// since the write path is not implemented.
///
/// The caller owns the fatal-failure policy: on `Err` the whole session is
/// expected to be torn down.
pub async fn subscribe<L: DeviceLink>(
    link: &mut L,
    cache: &mut CharacteristicCache,
    subscribed: &mut ChannelSet,
    channel: Channel,
    callback: Option<NotificationCallback>,
) -> Result<(), UartError> {
    let uuid = channel_uuid(channel);
    let callback = match channel {
        Channel::Tx => callback,
        Channel::Rx => None,
    };

    match link.subscribe(uuid, callback).await {
        Ok(()) => {
            subscribed.insert(channel);
            info!("Subscribed to {} UUID{{{}}}", channel, uuid);
            Ok(())
        }
        Err(source) => {
            subscribed.remove(channel);
            // Only a successful discovery that lacks the UUID proves absence.
            let err = match cache.contains(link, uuid).await {
                Some(false) => UartError::ChannelUnavailable {
                    channel,
                    uuid,
                    source,
                },
                Some(true) | None => UartError::SubscriptionFailed {
                    channel,
                    uuid,
                    source,
                },
            };
            error!("{}", err);
            Err(err)
        }
    }
}

/// Best-effort unsubscribe of `channels`. Failures are logged and the
/// channel stays marked subscribed; nothing is raised.
pub async fn unsubscribe<L: DeviceLink>(
    link: &mut L,
    subscribed: &mut ChannelSet,
    channels: ChannelSet,
) {
    for channel in channels.iter() {
        if !subscribed.contains(channel) {
            continue;
        }
        let uuid = channel_uuid(channel);
        match link.unsubscribe(uuid).await {
            Ok(()) => {
                subscribed.remove(channel);
                info!("Unsubscribed from {} UUID{{{}}}", channel, uuid);
            }
            Err(e) => error!("Failed to unsubscribe from {} UUID{{{}}} - {}", channel, uuid, e),
        }
    }
}
