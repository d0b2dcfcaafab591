use anyhow::anyhow;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0, none_of, satisfy},
    combinator::{all_consuming, cut, map, map_opt, map_res, not, opt, recognize, value, verify},
    error::context,
    multi::{many0, separated_list1},
    number::complete::{double, recognize_float},
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};
use nom_language::error::{convert_error, VerboseError};

use crate::geofile::feature::geometry_from_wkt;

use super::filter::{CompareOp, Filter, Literal, SpatialOp};

type ParseResult<'a, O> = IResult<&'a str, O, VerboseError<&'a str>>;

const RESERVED: [&str; 13] = [
    "AND", "OR", "NOT", "LIKE", "ILIKE", "BETWEEN", "IS", "NULL", "IN", "INCLUDE", "EXCLUDE",
    "TRUE", "FALSE",
];

const WKT_TYPES: [&str; 7] = [
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

const WKT_QUALIFIERS: [&str; 4] = ["Z", "M", "ZM", "EMPTY"];

/// Compile CQL/ECQL filter text into a [`Filter`].
pub fn parse_filter(text: &str) -> anyhow::Result<Filter> {
    if text.trim().is_empty() {
        return Err(anyhow!("Empty filter, use INCLUDE to select everything"));
    }
    match all_consuming(terminated(or_expr, multispace0)).parse(text) {
        Ok((_, filter)) => Ok(filter),
        Err(nom::Err::Error(err)) | Err(nom::Err::Failure(err)) => Err(syntax_error(text, err)),
        Err(nom::Err::Incomplete(_)) => Err(anyhow!("CQL syntax error: incomplete filter")),
    }
}

fn syntax_error(text: &str, err: VerboseError<&str>) -> anyhow::Error {
    // The first entry is the innermost failure.
    let position = err
        .errors
        .first()
        .map_or(0, |(rest, _)| text.len() - rest.len());
    anyhow!(
        "CQL syntax error at position {}:\n{}",
        position,
        convert_error(text, err)
    )
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == ':'
}

fn is_reserved(name: &str) -> bool {
    RESERVED.iter().any(|word| word.eq_ignore_ascii_case(name))
}

/// Case insensitive keyword that is not the start of a longer name.
fn keyword<'a>(
    word: &'static str,
) -> impl Parser<&'a str, Output = &'a str, Error = VerboseError<&'a str>> {
    terminated(tag_no_case(word), not(satisfy(is_name_char)))
}

/// `inner` after optional whitespace.
fn ws<'a, O, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = VerboseError<&'a str>>
where
    F: Parser<&'a str, Output = O, Error = VerboseError<&'a str>>,
{
    preceded(multispace0, inner)
}

fn or_expr(input: &str) -> ParseResult<'_, Filter> {
    map(
        pair(and_expr, many0(preceded(ws(keyword("OR")), cut(and_expr)))),
        |(first, rest)| combine(first, rest, Filter::Or),
    )
    .parse(input)
}

fn and_expr(input: &str) -> ParseResult<'_, Filter> {
    map(
        pair(not_expr, many0(preceded(ws(keyword("AND")), cut(not_expr)))),
        |(first, rest)| combine(first, rest, Filter::And),
    )
    .parse(input)
}

fn combine(first: Filter, rest: Vec<Filter>, join: fn(Vec<Filter>) -> Filter) -> Filter {
    if rest.is_empty() {
        return first;
    }
    let mut filters = vec![first];
    filters.extend(rest);
    join(filters)
}

fn not_expr(input: &str) -> ParseResult<'_, Filter> {
    preceded(
        multispace0,
        alt((
            map(preceded(keyword("NOT"), cut(not_expr)), |filter| {
                Filter::Not(Box::new(filter))
            }),
            primary,
        )),
    )
    .parse(input)
}

fn primary(input: &str) -> ParseResult<'_, Filter> {
    context(
        "predicate",
        alt((
            delimited(char('('), or_expr, cut(ws(char(')')))),
            value(Filter::Include, keyword("INCLUDE")),
            value(Filter::Exclude, keyword("EXCLUDE")),
            bbox,
            spatial,
            attribute_predicate,
            reversed_comparison,
        )),
    )
    .parse(input)
}

fn bare_name(input: &str) -> ParseResult<'_, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_name_char),
    ))
    .parse(input)
}

fn attribute(input: &str) -> ParseResult<'_, String> {
    context(
        "attribute name",
        alt((
            map(
                delimited(char('"'), take_while1(|c: char| c != '"'), cut(char('"'))),
                |name: &str| name.to_string(),
            ),
            map(verify(bare_name, |name: &str| !is_reserved(name)), |name: &str| {
                name.to_string()
            }),
        )),
    )
    .parse(input)
}

/// Single quoted text, `''` stands for one quote.
fn string_literal(input: &str) -> ParseResult<'_, String> {
    context(
        "quoted string",
        delimited(
            char('\''),
            map(
                many0(alt((value('\'', tag("''")), none_of("'")))),
                |chars: Vec<char>| chars.into_iter().collect::<String>(),
            ),
            cut(char('\'')),
        ),
    )
    .parse(input)
}

fn number(input: &str) -> ParseResult<'_, Literal> {
    context(
        "number",
        map_res(recognize_float, |text: &str| {
            if !text.contains(['.', 'e', 'E']) {
                if let Ok(value) = text.parse::<i64>() {
                    return Ok(Literal::Integer(value));
                }
            }
            text.parse::<f64>().map(Literal::Real)
        }),
    )
    .parse(input)
}

fn literal(input: &str) -> ParseResult<'_, Literal> {
    context(
        "literal value",
        alt((
            map(string_literal, Literal::Text),
            number,
            value(Literal::Boolean(true), keyword("TRUE")),
            value(Literal::Boolean(false), keyword("FALSE")),
        )),
    )
    .parse(input)
}

fn compare_op(input: &str) -> ParseResult<'_, CompareOp> {
    context(
        "comparison operator",
        alt((
            value(CompareOp::LessOrEqual, tag("<=")),
            value(CompareOp::NotEqual, tag("<>")),
            value(CompareOp::GreaterOrEqual, tag(">=")),
            value(CompareOp::NotEqual, tag("!=")),
            value(CompareOp::Less, tag("<")),
            value(CompareOp::Greater, tag(">")),
            value(CompareOp::Equal, tag("=")),
        )),
    )
    .parse(input)
}

/// What follows the attribute name of a predicate.
enum Condition {
    Compare(CompareOp, Literal),
    IsNull,
    Like {
        pattern: String,
        case_insensitive: bool,
    },
    Between(Literal, Literal),
    In(Vec<Literal>),
}

impl Condition {
    fn on(self, attribute: String) -> Filter {
        match self {
            Condition::Compare(op, value) => Filter::Compare {
                attribute,
                op,
                value,
            },
            Condition::IsNull => Filter::IsNull { attribute },
            Condition::Like {
                pattern,
                case_insensitive,
            } => Filter::Like {
                attribute,
                pattern,
                case_insensitive,
            },
            Condition::Between(lower, upper) => Filter::Between {
                attribute,
                lower,
                upper,
            },
            Condition::In(values) => Filter::In { attribute, values },
        }
    }
}

fn comparison(input: &str) -> ParseResult<'_, Condition> {
    map(pair(compare_op, cut(ws(literal))), |(op, value)| {
        Condition::Compare(op, value)
    })
    .parse(input)
}

fn is_null(input: &str) -> ParseResult<'_, (Condition, bool)> {
    map(
        (
            keyword("IS"),
            ws(opt(keyword("NOT"))),
            cut(ws(keyword("NULL"))),
        ),
        |(_, negated, _)| (Condition::IsNull, negated.is_some()),
    )
    .parse(input)
}

fn like(input: &str) -> ParseResult<'_, Condition> {
    map(
        pair(
            alt((value(false, keyword("LIKE")), value(true, keyword("ILIKE")))),
            cut(ws(string_literal)),
        ),
        |(case_insensitive, pattern)| Condition::Like {
            pattern,
            case_insensitive,
        },
    )
    .parse(input)
}

fn between(input: &str) -> ParseResult<'_, Condition> {
    map(
        preceded(
            keyword("BETWEEN"),
            cut((ws(literal), ws(keyword("AND")), ws(literal))),
        ),
        |(lower, _, upper)| Condition::Between(lower, upper),
    )
    .parse(input)
}

fn in_list(input: &str) -> ParseResult<'_, Condition> {
    map(
        preceded(
            keyword("IN"),
            cut(delimited(
                ws(char('(')),
                separated_list1(ws(char(',')), ws(literal)),
                ws(char(')')),
            )),
        ),
        Condition::In,
    )
    .parse(input)
}

fn condition(input: &str) -> ParseResult<'_, (Condition, bool)> {
    context(
        "comparison, LIKE, BETWEEN, IN or IS",
        alt((
            map(comparison, |condition| (condition, false)),
            is_null,
            map(
                pair(
                    opt(terminated(keyword("NOT"), multispace0)),
                    alt((like, between, in_list)),
                ),
                |(negated, condition)| (condition, negated.is_some()),
            ),
        )),
    )
    .parse(input)
}

fn attribute_predicate(input: &str) -> ParseResult<'_, Filter> {
    let (input, name) = attribute(input)?;
    let (input, (found, negated)) = cut(ws(condition)).parse(input)?;
    let filter = found.on(name);
    if negated {
        return Ok((input, Filter::Not(Box::new(filter))));
    }
    Ok((input, filter))
}

/// Literal on the left: `5 < pop` is `pop > 5`.
fn reversed_comparison(input: &str) -> ParseResult<'_, Filter> {
    map(
        (literal, ws(compare_op), cut(ws(attribute))),
        |(value, op, attribute)| Filter::Compare {
            attribute,
            op: op.flipped(),
            value,
        },
    )
    .parse(input)
}

fn next_coordinate(input: &str) -> ParseResult<'_, f64> {
    preceded(ws(char(',')), ws(double)).parse(input)
}

/// `BBOX(geom, minx, miny, maxx, maxy [, 'crs'])`
fn bbox(input: &str) -> ParseResult<'_, Filter> {
    let (input, _) = pair(keyword("BBOX"), ws(char('('))).parse(input)?;
    let (input, (attribute, min_x, min_y, max_x, max_y, crs, _)) = cut(context(
        "BBOX arguments",
        (
            ws(attribute),
            next_coordinate,
            next_coordinate,
            next_coordinate,
            next_coordinate,
            opt(preceded(ws(char(',')), ws(string_literal))),
            ws(char(')')),
        ),
    ))
    .parse(input)?;
    if let Some(crs) = crs {
        log::debug!("Ignoring BBOX CRS {}, the layer CRS is assumed", crs);
    }
    Ok((
        input,
        Filter::Spatial {
            attribute,
            op: SpatialOp::Intersects,
            geometry: envelope(min_x, min_y, max_x, max_y),
        },
    ))
}

fn spatial(input: &str) -> ParseResult<'_, Filter> {
    let (input, op) =
        terminated(map_opt(bare_name, SpatialOp::from_name), ws(char('('))).parse(input)?;
    let (input, (attribute, _, geometry, _)) = cut(context(
        "spatial predicate arguments",
        (
            ws(attribute),
            ws(char(',')),
            ws(geometry_literal),
            ws(char(')')),
        ),
    ))
    .parse(input)?;
    Ok((
        input,
        Filter::Spatial {
            attribute,
            op,
            geometry,
        },
    ))
}

fn geometry_literal(input: &str) -> ParseResult<'_, geo::Geometry> {
    context(
        "WKT geometry or ENVELOPE",
        alt((envelope_literal, wkt_literal)),
    )
    .parse(input)
}

/// ECQL order: `ENVELOPE(minx, maxx, maxy, miny)`
fn envelope_literal(input: &str) -> ParseResult<'_, geo::Geometry> {
    map(
        preceded(
            keyword("ENVELOPE"),
            cut((
                ws(char('(')),
                ws(double),
                next_coordinate,
                next_coordinate,
                next_coordinate,
                ws(char(')')),
            )),
        ),
        |(_, min_x, max_x, max_y, min_y, _)| envelope(min_x, min_y, max_x, max_y),
    )
    .parse(input)
}

fn balanced_parens(input: &str) -> ParseResult<'_, &str> {
    recognize((
        char('('),
        many0(alt((
            take_while1(|c: char| c != '(' && c != ')'),
            balanced_parens,
        ))),
        cut(char(')')),
    ))
    .parse(input)
}

/// WKT text, e.g. `POINT (1 2)`, `POINT Z (1 2 3)` or `POLYGON EMPTY`, handed to OGR.
fn wkt_literal(input: &str) -> ParseResult<'_, geo::Geometry> {
    let wkt_type = verify(bare_name, |name: &str| {
        WKT_TYPES.iter().any(|ty| ty.eq_ignore_ascii_case(name))
    });
    let qualifier = verify(bare_name, |name: &str| {
        WKT_QUALIFIERS.iter().any(|known| known.eq_ignore_ascii_case(name))
    });
    map_res(
        recognize((wkt_type, many0(ws(qualifier)), opt(ws(balanced_parens)))),
        |wkt: &str| {
            geometry_from_wkt(wkt).map_err(|err| {
                log::debug!("Rejected WKT {:?}: {:#}", wkt, err);
                err
            })
        },
    )
    .parse(input)
}

fn envelope(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> geo::Geometry {
    geo::Rect::new(
        geo::coord! { x: min_x, y: min_y },
        geo::coord! { x: max_x, y: max_y },
    )
    .to_polygon()
    .into()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::cql::filter::{CompareOp, Filter, Literal, SpatialOp};

    use super::{attribute, number, parse_filter, string_literal};

    fn compare(attribute: &str, op: CompareOp, value: Literal) -> Filter {
        Filter::Compare {
            attribute: attribute.to_string(),
            op,
            value,
        }
    }

    #[rstest]
    #[case("include", Filter::Include)]
    #[case("EXCLUDE", Filter::Exclude)]
    #[case("pop > 1000", compare("pop", CompareOp::Greater, Literal::Integer(1000)))]
    #[case("5 < pop", compare("pop", CompareOp::Greater, Literal::Integer(5)))]
    #[case("area <= -2.5", compare("area", CompareOp::LessOrEqual, Literal::Real(-2.5)))]
    #[case("name = 'Tokyo'", compare("name", CompareOp::Equal, Literal::Text("Tokyo".to_string())))]
    #[case(
        "\"my field\" != TRUE",
        compare("my field", CompareOp::NotEqual, Literal::Boolean(true))
    )]
    #[case("note IS NULL", Filter::IsNull { attribute: "note".to_string() })]
    #[case(
        "note is not null",
        Filter::Not(Box::new(Filter::IsNull { attribute: "note".to_string() }))
    )]
    #[case(
        "name LIKE 'To%'",
        Filter::Like {
            attribute: "name".to_string(),
            pattern: "To%".to_string(),
            case_insensitive: false,
        }
    )]
    #[case(
        "name NOT ILIKE 'to%'",
        Filter::Not(Box::new(Filter::Like {
            attribute: "name".to_string(),
            pattern: "to%".to_string(),
            case_insensitive: true,
        }))
    )]
    #[case(
        "pop BETWEEN 1 AND 10",
        Filter::Between {
            attribute: "pop".to_string(),
            lower: Literal::Integer(1),
            upper: Literal::Integer(10),
        }
    )]
    #[case(
        "id IN (1, 2, 3)",
        Filter::In {
            attribute: "id".to_string(),
            values: vec![Literal::Integer(1), Literal::Integer(2), Literal::Integer(3)],
        }
    )]
    fn test_parse_predicates(#[case] text: &str, #[case] expected: Filter) {
        assert_eq!(parse_filter(text).unwrap(), expected);
    }

    #[test]
    fn test_precedence() {
        // AND binds tighter than OR; BETWEEN consumes its own AND.
        let filter = parse_filter("a = 1 OR b BETWEEN 2 AND 3 AND NOT c = 4").unwrap();
        assert_eq!(
            filter,
            Filter::Or(vec![
                compare("a", CompareOp::Equal, Literal::Integer(1)),
                Filter::And(vec![
                    Filter::Between {
                        attribute: "b".to_string(),
                        lower: Literal::Integer(2),
                        upper: Literal::Integer(3),
                    },
                    Filter::Not(Box::new(compare("c", CompareOp::Equal, Literal::Integer(4)))),
                ]),
            ])
        );
        let grouped = parse_filter("(a = 1 OR b = 2) AND c = 3").unwrap();
        assert!(matches!(grouped, Filter::And(ref parts) if matches!(parts[0], Filter::Or(_))));
    }

    #[test]
    fn test_parse_bbox() {
        let filter = parse_filter("BBOX(the_geom, 129, 30, 146, 46)").unwrap();
        let Filter::Spatial {
            attribute,
            op,
            geometry,
        } = filter
        else {
            panic!("Expected a spatial filter");
        };
        assert_eq!(attribute, "the_geom");
        assert_eq!(op, SpatialOp::Intersects);
        let expected: geo::Geometry = geo::Rect::new(
            geo::coord! { x: 129.0, y: 30.0 },
            geo::coord! { x: 146.0, y: 46.0 },
        )
        .to_polygon()
        .into();
        assert_eq!(geometry, expected);
    }

    #[rstest]
    #[case("INTERSECTS(the_geom, POINT (1 2))", SpatialOp::Intersects)]
    #[case("CONTAINS(the_geom, POLYGON ((0 0, 1 0, 1 1, 0 0)))", SpatialOp::Contains)]
    #[case("within(the_geom, ENVELOPE(0, 10, 10, 0))", SpatialOp::Within)]
    #[case("DISJOINT(the_geom, MULTIPOINT ((1 2), (3 4)))", SpatialOp::Disjoint)]
    fn test_parse_spatial(#[case] text: &str, #[case] expected_op: SpatialOp) {
        let Filter::Spatial { op, .. } = parse_filter(text).unwrap() else {
            panic!("Expected a spatial filter");
        };
        assert_eq!(op, expected_op);
    }

    #[test]
    fn test_wkt_literal_is_parsed() {
        let Filter::Spatial { geometry, .. } =
            parse_filter("INTERSECTS(the_geom, POINT (1 2))").unwrap()
        else {
            panic!("Expected a spatial filter");
        };
        assert_eq!(geometry, geo::Geometry::Point(geo::Point::new(1.0, 2.0)));
    }

    #[rstest]
    #[case("")]
    #[case("pop >")]
    #[case("pop > 1 AND")]
    #[case("(pop > 1")]
    #[case("pop 5")]
    #[case("name LIKE pattern")]
    #[case("pop > 1 pop < 3")]
    #[case("INTERSECTS(the_geom, CIRCLE (1 2))")]
    #[case("INTERSECTS(the_geom, POLYGON ((0 0, 1 0)")]
    #[case("AND = 1")]
    fn test_parse_errors(#[case] text: &str) {
        assert!(parse_filter(text).is_err());
    }

    #[test]
    fn test_error_reports_position() {
        let err = parse_filter("pop > 1 OR name LIKE 5").unwrap_err().to_string();
        assert!(err.contains("position 21"), "{}", err);
        assert!(err.contains("quoted string"), "{}", err);
    }

    #[test]
    fn test_error_names_expected_token() {
        let err = parse_filter("(pop > 1").unwrap_err().to_string();
        assert!(err.starts_with("CQL syntax error at position 8"), "{}", err);
        assert!(err.contains("expected ')'"), "{}", err);
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(
            string_literal("'Côte d''Ivoire' rest"),
            Ok((" rest", "Côte d'Ivoire".to_string()))
        );
        assert_eq!(string_literal("''"), Ok(("", String::new())));
        assert!(string_literal("'open").is_err());
        assert!(string_literal("bare").is_err());
    }

    #[rstest]
    #[case("42", Literal::Integer(42))]
    #[case("-7", Literal::Integer(-7))]
    #[case("1.5e-3", Literal::Real(1.5e-3))]
    #[case("99999999999999999999", Literal::Real(1e20))]
    fn test_number(#[case] text: &str, #[case] expected: Literal) {
        assert_eq!(number(text).unwrap(), ("", expected));
    }

    #[test]
    fn test_attribute() {
        assert_eq!(attribute("POP_RANK >= 5"), Ok((" >= 5", "POP_RANK".to_string())));
        assert_eq!(
            attribute("\"Country Name\" <> 'x'"),
            Ok((" <> 'x'", "Country Name".to_string()))
        );
        assert!(attribute("AND").is_err());
        assert!(attribute("true").is_err());
        assert!(attribute("5").is_err());
    }
}
