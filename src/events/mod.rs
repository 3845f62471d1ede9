use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::commerce::{OrderStatus, PaymentStatus};

/// Domain events emitted after a committed state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Bag events
    BagCreated(Uuid),
    BagItemAdded { bag_id: Uuid, product_id: Uuid },
    BagItemRemoved { bag_id: Uuid, item_id: Uuid },
    BagDeleted(Uuid),

    // Checkout events
    CheckoutStarted { bag_id: Uuid, store_id: Uuid },

    // Order events
    OrderCreated {
        order_id: Uuid,
        bag_id: Uuid,
        checkout_session_id: Option<String>,
    },
    OrderStatusChanged {
        order_id: Uuid,
        new_status: OrderStatus,
    },
    OrderAddressUpdated {
        order_id: Uuid,
        address_id: Uuid,
    },
    PaymentStatusChanged {
        order_id: Uuid,
        new_status: PaymentStatus,
    },
    RefundRequested {
        order_id: Uuid,
        payment_intent_id: String,
    },

    // Connect-account events
    StoreSetupChanged {
        store_id: Uuid,
        complete: bool,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Events are emitted after commit and must never undo a state change.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Background consumer that records every domain event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated { order_id, .. } => {
                info!(order_id = %order_id, "order created");
            }
            Event::PaymentStatusChanged {
                order_id,
                new_status,
            } => {
                info!(order_id = %order_id, status = ?new_status, "payment status changed");
            }
            Event::OrderStatusChanged {
                order_id,
                new_status,
            } => {
                info!(order_id = %order_id, status = ?new_status, "order status changed");
            }
            other => debug!(event = ?other, "event received"),
        }
    }

    info!("Event channel closed; stopping event processing loop");
}
