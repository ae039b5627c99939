use std::collections::HashMap;

use log::warn;
use serde::Serialize;

/// Per-category spending ceilings in major currency units.
///
/// Keys are trimmed and lowercased on load and on lookup, so `" Groceries "`
/// and `"groceries"` name the same budget.
#[derive(Debug, Clone, Default)]
pub struct BudgetTable {
    budgets: HashMap<String, f64>,
    order: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetEntry {
    pub category: String,
    pub ceiling: f64,
}

fn normalize(category: &str) -> String {
    category.trim().to_lowercase()
}

impl BudgetTable {
    /// Builds the table from a JSON object such as `{"groceries": 300}`.
    ///
    /// Anything that is not a JSON object produces an empty table, and entries
    /// whose value is not a number are dropped. Neither case is an error.
    pub fn from_json(raw: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!("category budgets are not valid JSON, no budgets configured: {err}");
                return Self::default();
            }
        };
        let Some(object) = value.as_object() else {
            warn!("category budgets must be a JSON object, no budgets configured");
            return Self::default();
        };

        let mut table = Self::default();
        for (name, ceiling) in object {
            match ceiling.as_f64() {
                Some(ceiling) => table.insert(name, ceiling),
                None => warn!("ignoring non-numeric budget for category {name:?}"),
            }
        }
        table
    }

    fn insert(&mut self, category: &str, ceiling: f64) {
        let key = normalize(category);
        if self.budgets.insert(key.clone(), ceiling).is_none() {
            self.order.push(key);
        }
    }

    pub fn lookup(&self, category: &str) -> Option<f64> {
        self.budgets.get(&normalize(category)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.budgets.is_empty()
    }

    /// Entries in the order their keys first appeared in the configuration.
    pub fn entries(&self) -> Vec<BudgetEntry> {
        self.order
            .iter()
            .map(|category| BudgetEntry {
                category: category.clone(),
                ceiling: self.budgets[category],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_whitespace() {
        let table = BudgetTable::from_json(r#"{"Groceries": 100.0, " transport ": 40}"#);
        assert_eq!(table.lookup(" Groceries "), Some(100.0));
        assert_eq!(table.lookup("groceries"), table.lookup(" Groceries "));
        assert_eq!(table.lookup("TRANSPORT"), Some(40.0));
    }

    #[test]
    fn missing_budget_is_absent_not_zero() {
        let table = BudgetTable::from_json(r#"{"groceries": 0}"#);
        assert_eq!(table.lookup("groceries"), Some(0.0));
        assert_eq!(table.lookup("health"), None);
    }

    #[test]
    fn malformed_configuration_degrades_to_no_budgets() {
        assert!(BudgetTable::from_json("not json").is_empty());
        assert!(BudgetTable::from_json("[1, 2, 3]").is_empty());
        assert!(BudgetTable::from_json("42").is_empty());
        assert!(BudgetTable::from_json("").is_empty());
    }

    #[test]
    fn non_numeric_values_are_skipped() {
        let table = BudgetTable::from_json(r#"{"groceries": "lots", "health": 25.5}"#);
        assert_eq!(table.lookup("groceries"), None);
        assert_eq!(table.lookup("health"), Some(25.5));
    }

    #[test]
    fn last_duplicate_after_normalization_wins() {
        let table = BudgetTable::from_json(r#"{"groceries": 100, " GROCERIES": 250, "health": 10}"#);
        assert_eq!(table.lookup("groceries"), Some(250.0));
        assert_eq!(
            table.entries(),
            vec![
                BudgetEntry {
                    category: "groceries".to_string(),
                    ceiling: 250.0,
                },
                BudgetEntry {
                    category: "health".to_string(),
                    ceiling: 10.0,
                },
            ]
        );
    }
}
