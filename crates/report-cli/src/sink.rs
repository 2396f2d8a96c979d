use tax_core::{CoreError, PipelineOutput, ReportSink};

/// Plain console rendering of the pipeline output.
pub struct ConsoleSink;

impl ReportSink for ConsoleSink {
    fn emit(&mut self, output: &PipelineOutput) -> Result<(), CoreError> {
        let cur = &output.base_currency;

        println!();
        println!("=== Tax report {} ===", output.tax_year);
        println!();

        println!("Realized gains/losses ({} lot matches):", output.realized.len());
        for (category, total) in output.gains_by_category() {
            println!("  {category:<28} {:>14.2} {cur}", total);
        }
        println!("  {:<28} {:>14.2} {cur}", "Total", output.total_gain());
        println!();

        let income = &output.income;
        println!("Income:");
        println!("  {:<28} {:>14.2} {cur}", "Dividends", income.dividends);
        println!("  {:<28} {:>14.2} {cur}", "Distributions", income.distributions);
        println!("  {:<28} {:>14.2} {cur}", "Interest", income.interest);
        println!(
            "  {:<28} {:>14.2} {cur}",
            "Payments in lieu", income.payments_in_lieu
        );
        println!(
            "  {:<28} {:>14.2} {cur}",
            "Option writer premium", income.option_writer_premium
        );
        println!("  {:<28} {:>14.2} {cur}", "Fees", income.fees);
        println!();

        if !income.withholding_by_country.is_empty() {
            println!("Withholding tax by country:");
            for (country, amount) in &income.withholding_by_country {
                println!("  {country:<28} {amount:>14.2} {cur}");
            }
            println!();
        }

        println!("Year-end positions:");
        for state in &output.final_states {
            let marker = if state.reconciled { " " } else { "!" };
            println!(
                "  {marker} {:<24} computed {:>12} reported {:>12}",
                state.symbol,
                state.computed_quantity,
                state
                    .reported_quantity
                    .map(|q| q.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        println!();

        if output.eoy_mismatches > 0 {
            println!(
                "WARNING: {} asset(s) failed end-of-year reconciliation (marked !)",
                output.eoy_mismatches
            );
        }
        if !output.unlinked_withholding.is_empty() {
            println!(
                "WARNING: {} withholding event(s) could not be linked to income: {:?}",
                output.unlinked_withholding.len(),
                output.unlinked_withholding
            );
        }
        if !output.unmatched_option_trades.is_empty() {
            println!(
                "WARNING: {} exercised/assigned trade(s) without a matching option event: {:?}",
                output.unmatched_option_trades.len(),
                output.unmatched_option_trades
            );
        }

        Ok(())
    }
}
