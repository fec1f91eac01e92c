//! Inbound fulfillment commands and their replies.

use common::{BookId, ConsignmentEntryId, ConsignmentId, OrderId, WarehouseId};
use domain::{CarrierUpdate, Consignment, Order, OrderEntry, ShippingAddress};
use inventory::{StockLedger, StockLevel, WarehouseSelector};
use serde::{Deserialize, Serialize};

use crate::coordinator::OrderFulfillmentCoordinator;
use crate::error::Result;
use crate::events::EventSink;
use crate::store::{ConsignmentStore, OrderStore};

/// A request from the order, warehouse or admin side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum FulfillmentCommand {
    /// Checkout produced a new order.
    PlaceOrder {
        #[serde(default)]
        order_id: OrderId,
        entries: Vec<OrderEntry>,
        #[serde(default)]
        shipping_address: ShippingAddress,
    },

    /// The order was confirmed and must reserve its stock.
    ConfirmOrder { order_id: OrderId },

    /// A warehouse shipped units of a consignment entry.
    RecordShipment {
        entry_id: ConsignmentEntryId,
        quantity: u32,
    },

    CancelOrder { order_id: OrderId },

    /// A carrier or operator moved a consignment.
    UpdateConsignment {
        consignment_id: ConsignmentId,
        update: CarrierUpdate,
    },

    Restock {
        book_id: BookId,
        warehouse_id: WarehouseId,
        quantity: u32,
    },

    /// Advisory stock lookup for catalog display.
    Available {
        book_id: BookId,
        warehouse_id: WarehouseId,
    },

    GetOrder { order_id: OrderId },
}

impl FulfillmentCommand {
    pub fn name(&self) -> &'static str {
        match self {
            FulfillmentCommand::PlaceOrder { .. } => "place_order",
            FulfillmentCommand::ConfirmOrder { .. } => "confirm_order",
            FulfillmentCommand::RecordShipment { .. } => "record_shipment",
            FulfillmentCommand::CancelOrder { .. } => "cancel_order",
            FulfillmentCommand::UpdateConsignment { .. } => "update_consignment",
            FulfillmentCommand::Restock { .. } => "restock",
            FulfillmentCommand::Available { .. } => "available",
            FulfillmentCommand::GetOrder { .. } => "get_order",
        }
    }
}

/// The successful outcome of a command.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FulfillmentReply {
    OrderPlaced {
        order_id: OrderId,
    },
    OrderConfirmed {
        order_id: OrderId,
        consignments: Vec<Consignment>,
    },
    ShipmentRecorded {
        consignment: Consignment,
    },
    OrderCancelled {
        order_id: OrderId,
    },
    ConsignmentUpdated {
        consignment: Consignment,
    },
    Restocked {
        stock: StockLevel,
    },
    Available {
        book_id: BookId,
        warehouse_id: WarehouseId,
        available: u32,
    },
    Order {
        order: Order,
        consignments: Vec<Consignment>,
    },
}

impl<L, S, O, C, E> OrderFulfillmentCoordinator<L, S, O, C, E>
where
    L: StockLedger,
    S: WarehouseSelector,
    O: OrderStore,
    C: ConsignmentStore + Clone,
    E: EventSink,
{
    /// Runs one command against the coordinator.
    #[tracing::instrument(skip(self, command), fields(command = command.name()))]
    pub async fn execute(&self, command: FulfillmentCommand) -> Result<FulfillmentReply> {
        match command {
            FulfillmentCommand::PlaceOrder {
                order_id,
                entries,
                shipping_address,
            } => {
                let order = Order::new(order_id, entries, shipping_address)?;
                self.place_order(order).await?;
                Ok(FulfillmentReply::OrderPlaced { order_id })
            }
            FulfillmentCommand::ConfirmOrder { order_id } => {
                let consignments = self.on_order_confirmed(order_id).await?;
                Ok(FulfillmentReply::OrderConfirmed {
                    order_id,
                    consignments,
                })
            }
            FulfillmentCommand::RecordShipment { entry_id, quantity } => {
                let consignment = self.on_shipment(entry_id, quantity).await?;
                Ok(FulfillmentReply::ShipmentRecorded { consignment })
            }
            FulfillmentCommand::CancelOrder { order_id } => {
                self.on_order_cancelled(order_id).await?;
                Ok(FulfillmentReply::OrderCancelled { order_id })
            }
            FulfillmentCommand::UpdateConsignment {
                consignment_id,
                update,
            } => {
                let consignment = self.update_consignment_status(consignment_id, update).await?;
                Ok(FulfillmentReply::ConsignmentUpdated { consignment })
            }
            FulfillmentCommand::Restock {
                book_id,
                warehouse_id,
                quantity,
            } => {
                let stock = self.restock(book_id, warehouse_id, quantity).await?;
                Ok(FulfillmentReply::Restocked { stock })
            }
            FulfillmentCommand::Available {
                book_id,
                warehouse_id,
            } => {
                let available = self.available(book_id, warehouse_id).await?;
                Ok(FulfillmentReply::Available {
                    book_id,
                    warehouse_id,
                    available,
                })
            }
            FulfillmentCommand::GetOrder { order_id } => {
                let order = self.order(order_id).await?;
                let consignments = self.consignments(order_id).await?;
                Ok(FulfillmentReply::Order {
                    order,
                    consignments,
                })
            }
        }
    }
}
