//! Paper execution gateway.
//!
//! Acknowledges every order immediately and keeps them in memory. Used for
//! dry runs and tests; nothing leaves the process.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::platforms::ExecutionGateway;
use crate::types::{OrderAck, OrderRequest, SubmissionError};

#[derive(Debug, Default)]
pub struct PaperGateway {
    orders: Mutex<Vec<OrderRequest>>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders acknowledged so far, in submission order.
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, SubmissionError> {
        let mut orders = self
            .orders
            .lock()
            .map_err(|_| SubmissionError::Unavailable("paper ledger poisoned".into()))?;
        orders.push(order.clone());

        let ack = OrderAck {
            order_id: format!("paper-{}", uuid::Uuid::new_v4()),
            token_id: order.token_id.clone(),
            status: "matched".into(),
            timestamp: Utc::now(),
        };
        info!(
            order_id = %ack.order_id,
            token = %order.token_id,
            side = %order.side,
            price = %order.price,
            size = %order.size,
            "Paper order acknowledged"
        );
        Ok(ack)
    }

    fn name(&self) -> &'static str {
        "paper"
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_gateway_records_orders() {
        let gateway = PaperGateway::new();
        let order = OrderRequest {
            token_id: "tok-yes".into(),
            side: Side::Buy,
            price: dec!(0.45),
            size: dec!(10),
        };

        let ack = gateway.submit(&order).await.unwrap();
        assert!(ack.order_id.starts_with("paper-"));
        assert_eq!(ack.token_id, "tok-yes");
        assert_eq!(gateway.orders(), vec![order]);
        assert_eq!(gateway.name(), "paper");
        assert!(gateway.is_simulated());
    }

    #[test]
    fn test_paper_gateway_sequential_acks_unique() {
        let gateway = PaperGateway::new();
        let order = OrderRequest {
            token_id: "tok-no".into(),
            side: Side::Buy,
            price: dec!(0.50),
            size: dec!(2),
        };

        let first = tokio_test::assert_ok!(tokio_test::block_on(gateway.submit(&order)));
        let second = tokio_test::assert_ok!(tokio_test::block_on(gateway.submit(&order)));
        assert_ne!(first.order_id, second.order_id);
        assert_eq!(gateway.orders().len(), 2);
    }
}
