//! Market basket analysis: frequent product pairs and association rules

use crate::aggregate::{group_reduce, Aggregation};
use crate::data::{Table, ORDER_ID, PRODUCT, QUANTITY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BasketParams {
    /// Minimum share of baskets an itemset must appear in
    pub min_support: f64,
    /// Minimum lift for a rule to be kept
    pub min_lift: f64,
    pub max_rules: usize,
}

impl Default for BasketParams {
    fn default() -> Self {
        Self {
            min_support: 0.01,
            min_lift: 1.0,
            max_rules: 10,
        }
    }
}

/// `antecedent -> consequent`
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationRule {
    pub antecedent: String,
    pub consequent: String,
    pub antecedent_support: f64,
    pub consequent_support: f64,
    pub support: f64,
    pub confidence: f64,
    pub lift: f64,
}

/// Products bought with a positive total quantity, one basket per order in
/// order of first appearance
pub fn order_baskets(table: &Table) -> crate::Result<Vec<Vec<String>>> {
    let view = group_reduce(table.frame(), &[ORDER_ID, PRODUCT], &[Aggregation::sum(QUANTITY)])?;
    let orders = view.labels(ORDER_ID)?;
    let products = view.labels(PRODUCT)?;
    let quantities = view.values(QUANTITY)?;

    let mut baskets: Vec<Vec<String>> = Vec::new();
    let mut index: BTreeMap<&str, usize> = BTreeMap::new();
    for ((order, product), quantity) in orders.iter().zip(products).zip(quantities) {
        let slot = *index.entry(order.as_str()).or_insert_with(|| {
            baskets.push(Vec::new());
            baskets.len() - 1
        });
        if quantity.unwrap_or(0.0) > 0.0 {
            baskets[slot].push(product);
        }
    }
    Ok(baskets)
}

/// Mine single-product rules from baskets of distinct products.
///
/// Rules are ordered by lift, then confidence, both descending; remaining ties
/// keep the alphabetical order of the (antecedent, consequent) pair.
pub fn association_rules(baskets: &[Vec<String>], params: &BasketParams) -> Vec<AssociationRule> {
    if baskets.is_empty() {
        return Vec::new();
    }
    let n = baskets.len() as f64;

    let mut item_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for basket in baskets {
        for item in distinct(basket) {
            *item_counts.entry(item).or_default() += 1;
        }
    }
    let frequent: BTreeMap<&str, f64> = item_counts
        .into_iter()
        .map(|(item, count)| (item, count as f64 / n))
        .filter(|(_, support)| *support >= params.min_support)
        .collect();

    let mut pair_counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for basket in baskets {
        let items: Vec<&str> = distinct(basket)
            .into_iter()
            .filter(|item| frequent.contains_key(item))
            .collect();
        for (i, a) in items.iter().enumerate() {
            for b in &items[i + 1..] {
                *pair_counts.entry((*a, *b)).or_default() += 1;
            }
        }
    }

    let mut rules = Vec::new();
    for ((a, b), count) in pair_counts {
        let support = count as f64 / n;
        if support < params.min_support {
            continue;
        }
        for (antecedent, consequent) in [(a, b), (b, a)] {
            let antecedent_support = frequent[antecedent];
            let consequent_support = frequent[consequent];
            let confidence = support / antecedent_support;
            let lift = confidence / consequent_support;
            if lift >= params.min_lift {
                rules.push(AssociationRule {
                    antecedent: antecedent.to_string(),
                    consequent: consequent.to_string(),
                    antecedent_support,
                    consequent_support,
                    support,
                    confidence,
                    lift,
                });
            }
        }
    }

    rules.sort_by(|x, y| {
        y.lift
            .total_cmp(&x.lift)
            .then(y.confidence.total_cmp(&x.confidence))
    });
    rules.truncate(params.max_rules);
    rules
}

/// Sorted distinct items of one basket
fn distinct(basket: &[String]) -> Vec<&str> {
    let mut items: Vec<&str> = basket.iter().map(String::as_str).collect();
    items.sort_unstable();
    items.dedup();
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::record;

    fn baskets(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|b| b.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_pair_rules() {
        let baskets = baskets(&[
            &["Alchemy", "Storage"],
            &["Alchemy", "Storage"],
            &["Alchemy"],
            &["Support"],
        ]);
        let rules = association_rules(&baskets, &BasketParams::default());

        // Alchemy 3/4, Storage 2/4, pair 2/4
        assert_eq!(rules.len(), 2);
        let storage_to_alchemy = &rules[0];
        assert_eq!(storage_to_alchemy.antecedent, "Storage");
        assert_eq!(storage_to_alchemy.consequent, "Alchemy");
        assert!((storage_to_alchemy.support - 0.5).abs() < 1e-12);
        assert!((storage_to_alchemy.confidence - 1.0).abs() < 1e-12);
        assert!((storage_to_alchemy.lift - 4.0 / 3.0).abs() < 1e-12);

        let alchemy_to_storage = &rules[1];
        assert!((alchemy_to_storage.confidence - 2.0 / 3.0).abs() < 1e-12);
        assert!((alchemy_to_storage.lift - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_min_support_and_lift_filter() {
        let baskets = baskets(&[&["A", "B"], &["A"], &["B"], &["A"], &["B"]]);

        // A and B co-occur less often than independence predicts: lift 5/9
        let rules = association_rules(&baskets, &BasketParams::default());
        assert!(rules.is_empty());

        let strict = BasketParams {
            min_support: 0.6,
            min_lift: 0.0,
            max_rules: 10,
        };
        assert!(association_rules(&baskets, &strict).is_empty());
    }

    #[test]
    fn test_duplicate_items_count_once() {
        let baskets = baskets(&[&["A", "A", "B"], &["A", "B"]]);
        let rules = association_rules(&baskets, &BasketParams::default());

        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| (r.support - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_order_baskets() {
        let mut zero = record("B", (2023, 1, 2), "2", "Support", 10.0, 1.0);
        zero.quantity = 0;
        let records = vec![
            record("A", (2023, 1, 1), "1", "Alchemy", 10.0, 1.0),
            record("A", (2023, 1, 1), "1", "Storage", 10.0, 1.0),
            zero,
            record("C", (2023, 1, 3), "3", "Alchemy", 10.0, 1.0),
            record("A", (2023, 1, 1), "1", "Alchemy", 10.0, 1.0),
        ];
        let table = Table::from_records(&records).unwrap();
        let baskets = order_baskets(&table).unwrap();

        assert_eq!(
            baskets,
            vec![
                vec!["Alchemy".to_string(), "Storage".to_string()],
                vec![],
                vec!["Alchemy".to_string()],
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(association_rules(&[], &BasketParams::default()).is_empty());
    }
}
