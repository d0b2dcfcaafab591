use std::cmp::Ordering;
use std::fmt;

use anyhow::anyhow;
use gdal::vector::FieldValue;
use geo::Relate;

use crate::geofile::feature::{field_value_to_string, Feature};
use crate::geofile::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl CompareOp {
    /// The operator to use when both operands swap sides, e.g. `5 < a` becomes `a > 5`.
    pub fn flipped(self) -> Self {
        match self {
            CompareOp::Less => CompareOp::Greater,
            CompareOp::LessOrEqual => CompareOp::GreaterOrEqual,
            CompareOp::Greater => CompareOp::Less,
            CompareOp::GreaterOrEqual => CompareOp::LessOrEqual,
            other => other,
        }
    }

    fn matches(self, ordering: Option<Ordering>) -> bool {
        let Some(ordering) = ordering else {
            return false;
        };
        match self {
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::NotEqual => ordering != Ordering::Equal,
            CompareOp::Less => ordering == Ordering::Less,
            CompareOp::LessOrEqual => ordering != Ordering::Greater,
            CompareOp::Greater => ordering == Ordering::Greater,
            CompareOp::GreaterOrEqual => ordering != Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Equal => "=",
            CompareOp::NotEqual => "<>",
            CompareOp::Less => "<",
            CompareOp::LessOrEqual => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterOrEqual => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialOp {
    Intersects,
    Disjoint,
    Contains,
    Within,
}

impl SpatialOp {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INTERSECTS" => Some(SpatialOp::Intersects),
            "DISJOINT" => Some(SpatialOp::Disjoint),
            "CONTAINS" => Some(SpatialOp::Contains),
            "WITHIN" => Some(SpatialOp::Within),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            SpatialOp::Intersects => "INTERSECTS",
            SpatialOp::Disjoint => "DISJOINT",
            SpatialOp::Contains => "CONTAINS",
            SpatialOp::Within => "WITHIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl Literal {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Integer(value) => Some(*value as f64),
            Literal::Real(value) => Some(*value),
            Literal::Text(value) => value.trim().parse().ok(),
            Literal::Boolean(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(value) => write!(f, "{}", value),
            Literal::Real(value) => write!(f, "{:?}", value),
            Literal::Text(value) => write!(f, "'{}'", value.replace('\'', "''")),
            Literal::Boolean(value) => write!(f, "{}", if *value { "TRUE" } else { "FALSE" }),
        }
    }
}

/// Compiled filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Include,
    Exclude,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Compare {
        attribute: String,
        op: CompareOp,
        value: Literal,
    },
    Like {
        attribute: String,
        pattern: String,
        case_insensitive: bool,
    },
    Between {
        attribute: String,
        lower: Literal,
        upper: Literal,
    },
    IsNull {
        attribute: String,
    },
    In {
        attribute: String,
        values: Vec<Literal>,
    },
    /// `BBOX` is compiled to an `Intersects` with the envelope polygon.
    Spatial {
        attribute: String,
        op: SpatialOp,
        geometry: geo::Geometry,
    },
}

impl Filter {
    pub fn is_include(&self) -> bool {
        matches!(self, Filter::Include)
    }

    pub fn evaluate(&self, feature: &Feature) -> bool {
        match self {
            Filter::Include => true,
            Filter::Exclude => false,
            Filter::And(filters) => filters.iter().all(|filter| filter.evaluate(feature)),
            Filter::Or(filters) => filters.iter().any(|filter| filter.evaluate(feature)),
            Filter::Not(filter) => !filter.evaluate(feature),
            Filter::Compare {
                attribute,
                op,
                value,
            } => feature
                .attribute(attribute)
                .map_or(false, |field| op.matches(compare(field, value))),
            Filter::Like {
                attribute,
                pattern,
                case_insensitive,
            } => feature.attribute(attribute).map_or(false, |field| {
                let text = field_value_to_string(field);
                if *case_insensitive {
                    like_matches(&pattern.to_lowercase(), &text.to_lowercase())
                } else {
                    like_matches(pattern, &text)
                }
            }),
            Filter::Between {
                attribute,
                lower,
                upper,
            } => feature.attribute(attribute).map_or(false, |field| {
                CompareOp::GreaterOrEqual.matches(compare(field, lower))
                    && CompareOp::LessOrEqual.matches(compare(field, upper))
            }),
            Filter::IsNull { attribute } => feature.attribute(attribute).is_none(),
            Filter::In { attribute, values } => {
                feature.attribute(attribute).map_or(false, |field| {
                    values
                        .iter()
                        .any(|value| CompareOp::Equal.matches(compare(field, value)))
                })
            }
            Filter::Spatial { op, geometry, .. } => match &feature.geometry {
                Some(feature_geometry) => {
                    let matrix = feature_geometry.relate(geometry);
                    match op {
                        SpatialOp::Intersects => matrix.is_intersects(),
                        SpatialOp::Disjoint => matrix.is_disjoint(),
                        SpatialOp::Contains => matrix.is_contains(),
                        SpatialOp::Within => matrix.is_within(),
                    }
                }
                None => false,
            },
        }
    }

    /// Names of the non-geometry attributes the filter reads, without duplicates.
    pub fn referenced_attributes(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_attributes(&mut names, false);
        names
    }

    /// Names used as the geometry operand of spatial predicates.
    pub fn referenced_geometry_attributes(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_attributes(&mut names, true);
        names
    }

    fn collect_attributes(&self, names: &mut Vec<String>, spatial: bool) {
        match self {
            Filter::Include | Filter::Exclude => {}
            Filter::And(filters) | Filter::Or(filters) => {
                for filter in filters {
                    filter.collect_attributes(names, spatial);
                }
            }
            Filter::Not(filter) => filter.collect_attributes(names, spatial),
            Filter::Spatial { attribute, .. } => {
                if spatial {
                    push_unique(names, attribute)
                }
            }
            Filter::Compare { attribute, .. }
            | Filter::Like { attribute, .. }
            | Filter::Between { attribute, .. }
            | Filter::IsNull { attribute }
            | Filter::In { attribute, .. } => {
                if !spatial {
                    push_unique(names, attribute)
                }
            }
        }
    }

    /// Check that every attribute the filter reads exists in `schema`.
    pub fn validate(&self, schema: &Schema) -> anyhow::Result<()> {
        for name in self.referenced_attributes() {
            if !schema.has_attribute(&name) {
                return Err(anyhow!(
                    "Unknown attribute '{}' in filter, {} has: {}",
                    name,
                    schema.type_name,
                    schema.attribute_names().join(", ")
                ));
            }
        }
        for name in self.referenced_geometry_attributes() {
            if !schema.is_geometry_field(&name) {
                return Err(anyhow!(
                    "'{}' is not the geometry attribute of {}, use '{}'",
                    name,
                    schema.type_name,
                    schema.geometry_field
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Include => write!(f, "INCLUDE"),
            Filter::Exclude => write!(f, "EXCLUDE"),
            Filter::And(filters) => write_joined(f, filters, "AND"),
            Filter::Or(filters) => write_joined(f, filters, "OR"),
            Filter::Not(filter) => write!(f, "NOT ({})", filter),
            Filter::Compare {
                attribute,
                op,
                value,
            } => write!(f, "{} {} {}", attribute, op.symbol(), value),
            Filter::Like {
                attribute,
                pattern,
                case_insensitive,
            } => write!(
                f,
                "{} {} {}",
                attribute,
                if *case_insensitive { "ILIKE" } else { "LIKE" },
                Literal::Text(pattern.clone())
            ),
            Filter::Between {
                attribute,
                lower,
                upper,
            } => write!(f, "{} BETWEEN {} AND {}", attribute, lower, upper),
            Filter::IsNull { attribute } => write!(f, "{} IS NULL", attribute),
            Filter::In { attribute, values } => {
                let values: Vec<String> = values.iter().map(|value| value.to_string()).collect();
                write!(f, "{} IN ({})", attribute, values.join(", "))
            }
            Filter::Spatial {
                attribute,
                op,
                geometry,
            } => write!(f, "{}({}, {:?})", op.name(), attribute, geometry),
        }
    }
}

fn push_unique(names: &mut Vec<String>, name: &String) {
    if !names.contains(name) {
        names.push(name.clone());
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, filters: &[Filter], keyword: &str) -> fmt::Result {
    let parts: Vec<String> = filters.iter().map(|filter| format!("({})", filter)).collect();
    write!(f, "{}", parts.join(&format!(" {} ", keyword)))
}

fn compare(field: &FieldValue, literal: &Literal) -> Option<Ordering> {
    match field {
        FieldValue::IntegerValue(value) => compare_integer(*value as i64, literal),
        FieldValue::Integer64Value(value) => compare_integer(*value, literal),
        FieldValue::RealValue(value) => value.partial_cmp(&literal.as_f64()?),
        FieldValue::StringValue(value) => compare_text(value, literal),
        FieldValue::DateValue(_) | FieldValue::DateTimeValue(_) => match literal {
            Literal::Text(text) => Some(field_value_to_string(field).as_str().cmp(text.as_str())),
            _ => None,
        },
        _ => None,
    }
}

fn compare_integer(value: i64, literal: &Literal) -> Option<Ordering> {
    match literal {
        Literal::Integer(other) => Some(value.cmp(other)),
        _ => (value as f64).partial_cmp(&literal.as_f64()?),
    }
}

fn compare_text(value: &str, literal: &Literal) -> Option<Ordering> {
    match literal {
        Literal::Text(text) => Some(value.cmp(text.as_str())),
        Literal::Integer(_) | Literal::Real(_) => match value.trim().parse::<f64>() {
            Ok(number) => number.partial_cmp(&literal.as_f64()?),
            Err(_) => Some(value.cmp(literal.to_string().as_str())),
        },
        Literal::Boolean(flag) => {
            let flag = if *flag { "true" } else { "false" };
            value.eq_ignore_ascii_case(flag).then_some(Ordering::Equal)
        }
    }
}

enum LikeToken {
    AnyRun,
    AnyChar,
    Char(char),
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyChar,
            '\\' => LikeToken::Char(chars.next().unwrap_or('\\')),
            other => LikeToken::Char(other),
        });
    }
    tokens
}

/// SQL `LIKE` matching: `%` matches any run of characters, `_` exactly one, `\` escapes.
pub fn like_matches(pattern: &str, text: &str) -> bool {
    let tokens = like_tokens(pattern);
    let text: Vec<char> = text.chars().collect();
    // matched[j]: the tokens consumed so far can match the first j characters.
    let mut matched = vec![false; text.len() + 1];
    matched[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            LikeToken::AnyRun => {
                let mut reachable = false;
                for j in 0..=text.len() {
                    reachable |= matched[j];
                    next[j] = reachable;
                }
            }
            LikeToken::AnyChar => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1];
                }
            }
            LikeToken::Char(c) => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1] && text[j - 1] == *c;
                }
            }
        }
        matched = next;
    }
    matched[text.len()]
}
