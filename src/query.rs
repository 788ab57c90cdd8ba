use std::collections::HashMap;

use mongodb::bson::{Bson, Document};
use mongodb::options::FindOptions;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 20;

const RESERVED: [&str; 4] = ["page", "sort", "limit", "fields"];
const COMPARISON_OPS: [&str; 4] = ["gte", "gt", "lte", "lt"];

/// Translates a raw query-string map into a filter document plus find
/// options. Stages chain in the fixed order
/// `filter → sort → select_fields → paginate`; each reads the original
/// parameter map, so earlier stages never clobber the keys later ones need.
///
/// The engine is deliberately permissive: unknown keys pass through as
/// equality predicates and callers whitelist fields upstream.
pub struct ApiFeatures<'a> {
    params: &'a HashMap<String, String>,
    filter: Document,
    options: FindOptions,
}

impl<'a> ApiFeatures<'a> {
    pub fn new(params: &'a HashMap<String, String>) -> Self {
        ApiFeatures {
            params,
            filter: Document::new(),
            options: FindOptions::default(),
        }
    }

    /// Strips the reserved keys and rewrites `field[op]` comparisons into
    /// `$op` operator documents. Several operators on the same field merge
    /// into one document, so `price[gte]=10&price[lt]=50` becomes a range.
    pub fn filter(mut self) -> Self {
        for (key, raw) in self.params {
            if RESERVED.contains(&key.as_str()) {
                continue;
            }
            match split_operator(key) {
                Some((field, op)) => {
                    if !matches!(self.filter.get(field), Some(Bson::Document(_))) {
                        self.filter.insert(field, Document::new());
                    }
                    if let Some(Bson::Document(ops)) = self.filter.get_mut(field) {
                        ops.insert(format!("${}", op), coerce(raw));
                    }
                }
                None => {
                    self.filter.insert(key.clone(), coerce(raw));
                }
            }
        }
        self
    }

    /// Comma-separated `sort` list, leading `-` for descending. Newest
    /// first when the parameter is absent.
    pub fn sort(mut self) -> Self {
        let mut sort = Document::new();
        if let Some(spec) = self.params.get("sort") {
            for field in spec.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                match field.strip_prefix('-') {
                    Some(name) => sort.insert(name, -1),
                    None => sort.insert(field, 1),
                };
            }
        }
        if sort.is_empty() {
            sort.insert("createdAt", -1);
        }
        self.options.sort = Some(sort);
        self
    }

    /// Comma-separated `fields` list into a projection, leading `-` to
    /// exclude. No parameter means no projection. The store keeps `_id` in
    /// inclusive projections unless it is excluded explicitly.
    pub fn select_fields(mut self) -> Self {
        if let Some(spec) = self.params.get("fields") {
            let mut projection = Document::new();
            for field in spec.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                match field.strip_prefix('-') {
                    Some(name) => projection.insert(name, 0),
                    None => projection.insert(field, 1),
                };
            }
            if !projection.is_empty() {
                self.options.projection = Some(projection);
            }
        }
        self
    }

    /// `skip = (page-1) * limit`. Values that fail to parse or are below 1
    /// fall back to the defaults, so nothing malformed reaches the store.
    pub fn paginate(mut self) -> Self {
        let page = positive_or(self.params.get("page"), DEFAULT_PAGE);
        let limit = positive_or(self.params.get("limit"), DEFAULT_LIMIT);
        self.options.skip = Some(((page - 1) * limit) as u64);
        self.options.limit = Some(limit);
        self
    }

    pub fn into_parts(self) -> (Document, FindOptions) {
        (self.filter, self.options)
    }
}

fn split_operator(key: &str) -> Option<(&str, &str)> {
    let open = key.find('[')?;
    if !key.ends_with(']') {
        return None;
    }
    let op = &key[open + 1..key.len() - 1];
    if COMPARISON_OPS.contains(&op) {
        Some((&key[..open], op))
    } else {
        None
    }
}

fn coerce(raw: &str) -> Bson {
    if let Ok(n) = raw.parse::<i64>() {
        return Bson::Int64(n);
    }
    if let Ok(n) = raw.parse::<f64>() {
        return Bson::Double(n);
    }
    Bson::String(raw.to_string())
}

fn positive_or(raw: Option<&String>, default: i64) -> i64 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|n| *n >= 1)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn run(pairs: &[(&str, &str)]) -> (Document, FindOptions) {
        let params = params(pairs);
        ApiFeatures::new(&params)
            .filter()
            .sort()
            .select_fields()
            .paginate()
            .into_parts()
    }

    #[test]
    fn defaults_apply_when_no_parameters_are_given() {
        let (filter, options) = run(&[]);
        assert!(filter.is_empty());
        assert_eq!(options.sort, Some(doc! {"createdAt": -1}));
        assert_eq!(options.projection, None);
        assert_eq!(options.skip, Some(0));
        assert_eq!(options.limit, Some(DEFAULT_LIMIT));
    }

    #[test]
    fn reserved_keys_never_reach_the_filter() {
        let (filter, _) = run(&[
            ("page", "2"),
            ("sort", "price"),
            ("limit", "5"),
            ("fields", "title"),
            ("category", "Electronics"),
        ]);
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.get_str("category").unwrap(), "Electronics");
    }

    #[test]
    fn bracket_operators_rewrite_to_dollar_syntax() {
        let (filter, _) = run(&[("price[lt]", "20")]);
        let ops = filter.get_document("price").unwrap();
        assert_eq!(ops.get("$lt"), Some(&Bson::Int64(20)));
    }

    #[test]
    fn operators_on_the_same_field_merge_into_a_range() {
        let (filter, _) = run(&[("price[gte]", "10"), ("price[lte]", "50.5")]);
        let ops = filter.get_document("price").unwrap();
        assert_eq!(ops.get("$gte"), Some(&Bson::Int64(10)));
        assert_eq!(ops.get("$lte"), Some(&Bson::Double(50.5)));
    }

    #[test]
    fn unknown_keys_pass_through_as_equality() {
        let (filter, _) = run(&[("subcategory", "Phones"), ("visits", "3")]);
        assert_eq!(filter.get_str("subcategory").unwrap(), "Phones");
        assert_eq!(filter.get("visits"), Some(&Bson::Int64(3)));
    }

    #[test]
    fn unknown_bracket_operators_stay_literal_keys() {
        let (filter, _) = run(&[("price[foo]", "1")]);
        assert_eq!(filter.get("price[foo]"), Some(&Bson::Int64(1)));
    }

    #[test]
    fn sort_splits_fields_and_honors_descending_prefix() {
        let (_, options) = run(&[("sort", "-price,title")]);
        assert_eq!(options.sort, Some(doc! {"price": -1, "title": 1}));
    }

    #[test]
    fn empty_sort_parameter_falls_back_to_newest_first() {
        let (_, options) = run(&[("sort", " , ")]);
        assert_eq!(options.sort, Some(doc! {"createdAt": -1}));
    }

    #[test]
    fn fields_build_an_inclusive_projection() {
        let (_, options) = run(&[("fields", "title,price")]);
        assert_eq!(options.projection, Some(doc! {"title": 1, "price": 1}));
    }

    #[test]
    fn minus_prefixed_fields_build_an_exclusive_projection() {
        let (_, options) = run(&[("fields", "-photos,-description")]);
        assert_eq!(options.projection, Some(doc! {"photos": 0, "description": 0}));
    }

    #[test]
    fn paginate_computes_skip_from_page_and_limit() {
        let (_, options) = run(&[("page", "3"), ("limit", "5")]);
        assert_eq!(options.skip, Some(10));
        assert_eq!(options.limit, Some(5));
    }

    #[test]
    fn malformed_page_and_limit_fall_back_to_defaults() {
        for bad in ["abc", "", "1.5", "-2", "0", "NaN"] {
            let (_, options) = run(&[("page", bad), ("limit", bad)]);
            assert_eq!(options.skip, Some(0), "page {:?}", bad);
            assert_eq!(options.limit, Some(DEFAULT_LIMIT), "limit {:?}", bad);
        }
    }

    // -- seed-scenario checks: the engine's emitted predicates evaluated
    //    against the fixture set from the browse endpoint's contract.

    struct Seed {
        price: f64,
        category: &'static str,
    }

    fn seeds() -> Vec<Seed> {
        let prices = [35.0, 14.0, 4.0, 120.0, 15.0, 3.0, 354.0, 279.0];
        let categories = [
            "Tools",
            "Tools",
            "BabyAndKids",
            "Electronics",
            "Electronics",
            "Electronics",
            "Entertainment",
            "Entertainment",
        ];
        prices
            .iter()
            .zip(categories.iter())
            .map(|(&price, &category)| Seed { price, category })
            .collect()
    }

    fn number(value: &Bson) -> f64 {
        match value {
            Bson::Int32(n) => f64::from(*n),
            Bson::Int64(n) => *n as f64,
            Bson::Double(n) => *n,
            other => panic!("not a number: {:?}", other),
        }
    }

    fn matches(filter: &Document, seed: &Seed) -> bool {
        filter.iter().all(|(key, condition)| match key.as_str() {
            "category" => condition.as_str() == Some(seed.category),
            "price" => match condition {
                Bson::Document(ops) => ops.iter().all(|(op, value)| {
                    let bound = number(value);
                    match op.as_str() {
                        "$gte" => seed.price >= bound,
                        "$gt" => seed.price > bound,
                        "$lte" => seed.price <= bound,
                        "$lt" => seed.price < bound,
                        _ => false,
                    }
                }),
                other => number(other) == seed.price,
            },
            _ => false,
        })
    }

    fn sorted_prices(sort: &Document) -> Vec<f64> {
        let mut prices: Vec<f64> = seeds().iter().map(|s| s.price).collect();
        let direction = sort.get_i32("price").unwrap();
        prices.sort_by(|a, b| a.partial_cmp(b).unwrap());
        if direction < 0 {
            prices.reverse();
        }
        prices
    }

    #[test]
    fn category_filter_selects_exactly_the_electronics() {
        let (filter, _) = run(&[("category", "Electronics")]);
        let count = seeds().iter().filter(|s| matches(&filter, s)).count();
        assert_eq!(count, 3);
    }

    #[test]
    fn price_upper_bound_selects_the_cheap_listings() {
        let (filter, _) = run(&[("price[lt]", "20")]);
        let count = seeds().iter().filter(|s| matches(&filter, s)).count();
        assert_eq!(count, 4);
    }

    #[test]
    fn price_sort_extremes_match_the_seed_set() {
        let (_, options) = run(&[("sort", "price")]);
        assert_eq!(sorted_prices(&options.sort.unwrap())[0], 3.0);

        let (_, options) = run(&[("sort", "-price")]);
        assert_eq!(sorted_prices(&options.sort.unwrap())[0], 354.0);
    }

    #[test]
    fn concatenated_pages_reproduce_the_full_set_without_gaps() {
        let ordered = sorted_prices(&doc! {"price": 1});
        let mut rebuilt = Vec::new();
        for page in 1..=3 {
            let page = page.to_string();
            let (_, options) = run(&[("page", page.as_str()), ("limit", "3")]);
            let skip = options.skip.unwrap() as usize;
            let limit = options.limit.unwrap() as usize;
            rebuilt.extend(ordered.iter().skip(skip).take(limit).cloned());
        }
        assert_eq!(rebuilt, ordered);
    }
}
