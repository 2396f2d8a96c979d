use chrono::NaiveDate;
use rust_decimal::Decimal;
use rate_service::RateService;
use tax_core::{CalcContext, EventPayload, FinancialEvent};
use tracing::warn;

/// Populate every monetary field's base-currency counterpart exactly
/// once per event.
///
/// Idempotent: fields already converted are skipped, so the pass is safe
/// to re-run. Amounts already in the base currency are copied verbatim;
/// zero amounts convert to zero without a lookup; a missing rate leaves
/// the field unset (never fabricated). A date-parse failure skips the
/// whole event with a warning.
pub fn enrich_events(events: &mut [FinancialEvent], ctx: &CalcContext, rates: &mut RateService) {
    for ev in events.iter_mut() {
        let Some(date) = ev.parsed_date() else {
            warn!(
                "unparseable date {:?} on event {}, skipping enrichment",
                ev.date, ev.id
            );
            continue;
        };
        enrich_event(ev, date, ctx, rates);
    }
}

fn enrich_event(
    ev: &mut FinancialEvent,
    date: NaiveDate,
    ctx: &CalcContext,
    rates: &mut RateService,
) {
    // Trades derive gross from quantity × price when the broker did not
    // report proceeds directly.
    if ev.gross_amount.is_none() {
        if let EventPayload::Trade(trade) = &ev.payload {
            ev.gross_amount = Some((trade.quantity.abs() * trade.price).abs());
        }
    }

    if ev.gross_base.is_none() {
        if let Some(gross) = ev.gross_amount {
            ev.gross_base = convert_amount(gross, &ev.currency, date, ctx, rates);
        }
    }

    let gross_base = ev.gross_base;
    let currency = ev.currency.clone();

    match &mut ev.payload {
        EventPayload::Trade(trade) => {
            if trade.commission_base.is_none() {
                let commission_currency = trade.commission_currency.clone();
                trade.commission_base =
                    convert_amount(trade.commission, &commission_currency, date, ctx, rates);
            }

            if trade.net_base.is_none() {
                // Net needs both sides; a missing commission conversion
                // (for a non-zero commission) leaves it unset rather than
                // guessed.
                if let (Some(gross), Some(commission)) = (gross_base, trade.commission_base) {
                    let net = if ev.kind.is_buy() {
                        gross + commission
                    } else {
                        gross - commission
                    };
                    trade.net_base = Some(ctx.quantize(net));
                }
            }
        }
        EventPayload::CorporateAction(action) => {
            if action.cash_per_share_base.is_none() {
                if let Some(cash) = action.cash_per_share {
                    action.cash_per_share_base =
                        convert_amount(cash, &currency, date, ctx, rates);
                }
            }
            if action.fmv_per_share_base.is_none() {
                if let Some(fmv) = action.fmv_per_share {
                    action.fmv_per_share_base = convert_amount(fmv, &currency, date, ctx, rates);
                }
            }
        }
        _ => {}
    }
}

/// Single-field conversion rule shared by every monetary field.
fn convert_amount(
    amount: Decimal,
    currency: &str,
    date: NaiveDate,
    ctx: &CalcContext,
    rates: &mut RateService,
) -> Option<Decimal> {
    if amount.is_zero() {
        return Some(Decimal::ZERO);
    }
    if ctx.is_base(currency) {
        return Some(ctx.quantize(amount));
    }
    match rates.get_rate(date, currency) {
        Some(rate) => Some(ctx.convert(amount, rate)),
        None => {
            warn!("no {currency} rate for {date}, leaving amount unconverted");
            None
        }
    }
}
