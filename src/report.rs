//! Sales report aggregator.
//!
//! Revenue, transaction count and best seller over a half-open UTC window.
//! The best seller is the product name with the highest summed quantity; ties
//! go to the lexicographically smallest name so results never depend on
//! backend row order.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, instrument};

use crate::domain::value_objects::ReportWindow;
use crate::store::LedgerStore;
use crate::{ProductQuantity, ReportSummary, Result, TopProduct};

#[derive(Clone)]
pub struct ReportAggregator {
    ledger: Arc<dyn LedgerStore>,
}

impl ReportAggregator {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Report over `[start, end)`. An empty or inverted window yields zeros.
    #[instrument(skip(self))]
    pub async fn report_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<ReportSummary> {
        let totals = self.ledger.window_totals(start, end).await?;
        let summary = ReportSummary {
            total_revenue: totals.revenue,
            total_transactions: totals.transaction_count,
            top_product: best_seller(&totals.quantities),
        };
        debug!(?summary, "report computed");
        Ok(summary)
    }

    pub async fn report_window(&self, window: ReportWindow) -> Result<ReportSummary> {
        self.report_between(window.start(), window.end()).await
    }

    /// Report over the UTC calendar day `day`.
    pub async fn report_for_day(&self, day: NaiveDate) -> Result<ReportSummary> {
        self.report_window(ReportWindow::day(day)).await
    }

    pub async fn report_today(&self) -> Result<ReportSummary> {
        self.report_for_day(Utc::now().date_naive()).await
    }
}

fn best_seller(quantities: &[ProductQuantity]) -> Option<TopProduct> {
    quantities
        .iter()
        .filter(|q| q.quantity > 0)
        .min_by(|a, b| b.quantity.cmp(&a.quantity).then_with(|| a.product_name.cmp(&b.product_name)))
        .map(|q| TopProduct { name: q.product_name.clone(), quantity_sold: q.quantity })
}
