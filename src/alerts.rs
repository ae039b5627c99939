use crate::budget::BudgetTable;
use crate::models::CategoryShare;
use crate::money::cents_to_major;

pub fn budget_alert(category: &str, overage: f64) -> String {
    format!("⚠ {category} budget exceeded by {overage:.2} €")
}

/// One alert per category whose spend is strictly above its configured ceiling,
/// in the order of `totals`. Categories without a budget never alert.
pub fn generate_alerts(totals: &[CategoryShare], budgets: &BudgetTable) -> Vec<String> {
    totals
        .iter()
        .filter_map(|total| {
            let ceiling = budgets.lookup(&total.category)?;
            let spent = cents_to_major(total.value);
            (spent > ceiling).then(|| budget_alert(&total.category, spent - ceiling))
        })
        .collect()
}
