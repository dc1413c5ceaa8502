//! Typed filter expressions over assets
//!
//! Filter strings such as `"MOODY'S RATING < B3 AND COV-LITE = TRUE"`
//! parse into a predicate tree over a closed vocabulary of field tags.
//! Rating fields compare on the shared 1..=22 rank scale, so `< B3` means
//! "ranked better than B3". Evaluation returns `Result<bool, FilterError>`;
//! nothing is driven by exceptions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::asset::Asset;
use crate::ratings::rating_rank;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("empty filter expression")]
    Empty,
    #[error("mismatched parentheses in filter expression")]
    MismatchedParens,
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("no comparison operator in: {0}")]
    MissingOperator(String),
    #[error("bad literal {literal:?} for field {field}")]
    BadLiteral { field: &'static str, literal: String },
    #[error("operator {op} not supported for field {field}")]
    UnsupportedComparison { field: &'static str, op: &'static str },
}

/// The closed vocabulary of filterable fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldTag {
    MoodysIndustry,
    SpIndustry,
    MoodysRating,
    SpRating,
    Wal,
    CovLite,
    Defaulted,
    Country,
    FacilitySize,
    MarketValue,
    AnalystOpinion,
}

impl FieldTag {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "MOODY'S INDUSTRY" => Some(Self::MoodysIndustry),
            "S&P INDUSTRY" => Some(Self::SpIndustry),
            "MOODY'S RATING" => Some(Self::MoodysRating),
            "S&P RATING" => Some(Self::SpRating),
            "WAL" => Some(Self::Wal),
            "COV-LITE" => Some(Self::CovLite),
            "DEFAULTED" => Some(Self::Defaulted),
            "COUNTRY" => Some(Self::Country),
            "FACILITY SIZE" => Some(Self::FacilitySize),
            "MARKET VALUE" => Some(Self::MarketValue),
            "ANALYST OPINION" => Some(Self::AnalystOpinion),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MoodysIndustry => "MOODY'S INDUSTRY",
            Self::SpIndustry => "S&P INDUSTRY",
            Self::MoodysRating => "MOODY'S RATING",
            Self::SpRating => "S&P RATING",
            Self::Wal => "WAL",
            Self::CovLite => "COV-LITE",
            Self::Defaulted => "DEFAULTED",
            Self::Country => "COUNTRY",
            Self::FacilitySize => "FACILITY SIZE",
            Self::MarketValue => "MARKET VALUE",
            Self::AnalystOpinion => "ANALYST OPINION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }

    fn holds<T: PartialOrd>(&self, left: T, right: T) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Lt => left < right,
            Self::Gt => left > right,
            Self::Le => left <= right,
            Self::Ge => left >= right,
        }
    }
}

/// A parsed filter predicate
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Compare {
        field: FieldTag,
        op: CompareOp,
        literal: String,
    },
}

impl FilterExpr {
    /// Parse a filter string. AND binds tighter than OR; parentheses group.
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(FilterError::Empty);
        }
        parse_or(trimmed)
    }

    /// Evaluate against one asset.
    pub fn evaluate(&self, asset: &Asset) -> Result<bool, FilterError> {
        match self {
            FilterExpr::And(left, right) => Ok(left.evaluate(asset)? && right.evaluate(asset)?),
            FilterExpr::Or(left, right) => Ok(left.evaluate(asset)? || right.evaluate(asset)?),
            FilterExpr::Compare { field, op, literal } => evaluate_compare(asset, *field, *op, literal),
        }
    }
}

fn parse_or(input: &str) -> Result<FilterExpr, FilterError> {
    if let Some((left, right)) = split_top_level(input, "OR")? {
        return Ok(FilterExpr::Or(
            Box::new(parse_or(&left)?),
            Box::new(parse_or(&right)?),
        ));
    }
    parse_and(input)
}

fn parse_and(input: &str) -> Result<FilterExpr, FilterError> {
    if let Some((left, right)) = split_top_level(input, "AND")? {
        return Ok(FilterExpr::And(
            Box::new(parse_and(&left)?),
            Box::new(parse_and(&right)?),
        ));
    }
    parse_atom(input)
}

fn parse_atom(input: &str) -> Result<FilterExpr, FilterError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FilterError::Empty);
    }
    if trimmed.starts_with('(') && trimmed.ends_with(')') && wraps_fully(trimmed)? {
        return parse_or(&trimmed[1..trimmed.len() - 1]);
    }
    parse_compare(trimmed)
}

fn parse_compare(input: &str) -> Result<FilterExpr, FilterError> {
    // Two-character operators first so "<=" is not read as "<"
    for (symbol, op) in [
        ("<=", CompareOp::Le),
        (">=", CompareOp::Ge),
        ("!=", CompareOp::Ne),
        ("<", CompareOp::Lt),
        (">", CompareOp::Gt),
        ("=", CompareOp::Eq),
    ] {
        if let Some(pos) = input.find(symbol) {
            let field_name = input[..pos].trim();
            let literal = input[pos + symbol.len()..].trim();
            let field = FieldTag::from_name(field_name)
                .ok_or_else(|| FilterError::UnknownField(field_name.to_string()))?;
            if literal.is_empty() {
                return Err(FilterError::BadLiteral {
                    field: field.name(),
                    literal: literal.to_string(),
                });
            }
            return Ok(FilterExpr::Compare {
                field,
                op,
                literal: literal.to_string(),
            });
        }
    }
    Err(FilterError::MissingOperator(input.to_string()))
}

/// Split at the first top-level occurrence of the keyword (not inside
/// parentheses, whole word).
fn split_top_level(input: &str, keyword: &str) -> Result<Option<(String, String)>, FilterError> {
    let upper = input.to_uppercase();
    let bytes = upper.as_bytes();
    let key = keyword.as_bytes();
    let mut depth: i32 = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(FilterError::MismatchedParens);
                }
            }
            _ => {
                if depth == 0
                    && bytes[i..].starts_with(key)
                    && (i == 0 || bytes[i - 1].is_ascii_whitespace())
                    && bytes
                        .get(i + key.len())
                        .map(|b| b.is_ascii_whitespace())
                        .unwrap_or(false)
                {
                    let left = input[..i].trim().to_string();
                    let right = input[i + key.len()..].trim().to_string();
                    if left.is_empty() || right.is_empty() {
                        return Err(FilterError::Empty);
                    }
                    return Ok(Some((left, right)));
                }
            }
        }
        i += 1;
    }
    if depth != 0 {
        return Err(FilterError::MismatchedParens);
    }
    Ok(None)
}

/// Whether the leading '(' pairs with the trailing ')'.
fn wraps_fully(input: &str) -> Result<bool, FilterError> {
    let mut depth = 0i32;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(FilterError::MismatchedParens);
                }
                if depth == 0 && i != input.len() - 1 {
                    return Ok(false);
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(FilterError::MismatchedParens);
    }
    Ok(true)
}

fn evaluate_compare(
    asset: &Asset,
    field: FieldTag,
    op: CompareOp,
    literal: &str,
) -> Result<bool, FilterError> {
    match field {
        FieldTag::MoodysRating => Ok(op.holds(
            rating_rank(&asset.moodys_rating),
            rating_rank(literal),
        )),
        FieldTag::SpRating => Ok(op.holds(rating_rank(&asset.sp_rating), rating_rank(literal))),
        FieldTag::Wal => compare_number(asset.wal.unwrap_or(0.0), op, field, literal),
        FieldTag::FacilitySize => {
            compare_number(asset.facility_size.unwrap_or(0.0), op, field, literal)
        }
        FieldTag::MarketValue => {
            compare_number(asset.market_value.unwrap_or(0.0), op, field, literal)
        }
        FieldTag::CovLite => compare_bool(asset.flags.cov_lite, op, field, literal),
        FieldTag::Defaulted => compare_bool(asset.is_defaulted(), op, field, literal),
        FieldTag::MoodysIndustry => compare_string(&asset.moodys_industry, op, field, literal),
        FieldTag::SpIndustry => compare_string(&asset.sp_industry, op, field, literal),
        FieldTag::Country => compare_string(&asset.country, op, field, literal),
        FieldTag::AnalystOpinion => compare_string(
            asset.analyst_opinion.as_deref().unwrap_or(""),
            op,
            field,
            literal,
        ),
    }
}

fn compare_number(
    value: f64,
    op: CompareOp,
    field: FieldTag,
    literal: &str,
) -> Result<bool, FilterError> {
    let target: f64 = literal.parse().map_err(|_| FilterError::BadLiteral {
        field: field.name(),
        literal: literal.to_string(),
    })?;
    Ok(op.holds(value, target))
}

fn compare_bool(
    value: bool,
    op: CompareOp,
    field: FieldTag,
    literal: &str,
) -> Result<bool, FilterError> {
    let target = match literal.to_uppercase().as_str() {
        "TRUE" | "YES" | "1" => true,
        "FALSE" | "NO" | "0" => false,
        _ => {
            return Err(FilterError::BadLiteral {
                field: field.name(),
                literal: literal.to_string(),
            })
        }
    };
    match op {
        CompareOp::Eq => Ok(value == target),
        CompareOp::Ne => Ok(value != target),
        other => Err(FilterError::UnsupportedComparison {
            field: field.name(),
            op: other.symbol(),
        }),
    }
}

fn compare_string(
    value: &str,
    op: CompareOp,
    field: FieldTag,
    literal: &str,
) -> Result<bool, FilterError> {
    let left = value.trim().to_uppercase();
    let right = literal.trim().to_uppercase();
    match op {
        CompareOp::Eq => Ok(left == right),
        CompareOp::Ne => Ok(left != right),
        other => Err(FilterError::UnsupportedComparison {
            field: field.name(),
            op: other.symbol(),
        }),
    }
}
