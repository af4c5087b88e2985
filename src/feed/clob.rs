//! Polling feed over the CLOB order books.

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{PriceFeed, Quote};
use crate::error::MarketError;
use crate::market::{MarketBinding, Outcome, PolymarketClient};
use crate::orderbook::OutcomeBook;

/// Quotes each token at its best ask, the price an entry would pay, with the
/// best bid attached for exits.
#[derive(Debug, Clone)]
pub struct ClobPriceFeed {
    client: PolymarketClient,
}

impl ClobPriceFeed {
    pub fn new(client: PolymarketClient) -> Self {
        Self { client }
    }
}

fn quote_from_book(book: &OutcomeBook) -> Option<Quote> {
    if book.is_inverted() {
        warn!(token_id = %book.token_id, "inverted book, skipping quote");
        return None;
    }
    let price = book.best_ask()?;
    let quote = Quote::new(book.token_id.clone(), price, book.updated_at);
    Some(match book.best_bid() {
        Some(bid) => quote.with_bid(bid),
        None => quote,
    })
}

#[async_trait]
impl PriceFeed for ClobPriceFeed {
    #[instrument(skip(self, binding), fields(slug = %binding.slug))]
    async fn poll(&mut self, binding: &MarketBinding) -> Result<Vec<Quote>, MarketError> {
        let (up, down) = tokio::join!(
            self.client.get_order_book(binding.token_id(Outcome::Up)),
            self.client.get_order_book(binding.token_id(Outcome::Down)),
        );

        let mut quotes = Vec::with_capacity(2);
        let mut last_err = None;
        for result in [up, down] {
            match result {
                Ok(book) => match quote_from_book(&book) {
                    Some(quote) => quotes.push(quote),
                    None => debug!(token_id = %book.token_id, "no asks on book"),
                },
                Err(e) => {
                    warn!(error = %e, "order book fetch failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if quotes.is_empty() => Err(e),
            _ => Ok(quotes),
        }
    }
}
