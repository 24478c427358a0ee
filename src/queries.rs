use airgraph_client::Query;

use crate::input::{Airport, Route};

pub const CLEANUP: &str = "g.V().drop()";
pub const COUNT_VERTICES: &str = "g.V().count()";

/// Partition key value stamped on every vertex.
const PARTITION_KEY: &str = "pk";

/// Render `value` as a single-quoted Gremlin string literal.
pub fn literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\\' || ch == '\'' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

pub fn add_airport(airport: &Airport) -> Query {
    Query::new(format!(
        "g.addV('airport').property('id', {}).property('code', {}).property('icao', {}).property('desc', {}).property('pk', {})",
        literal(&airport.id),
        literal(&airport.code),
        literal(&airport.icao),
        literal(&airport.desc),
        literal(PARTITION_KEY),
    ))
}

pub fn add_route(route: &Route) -> Query {
    Query::new(format!(
        "g.V({}).addE('line').to(g.V({}))",
        literal(&route.source),
        literal(&route.target)
    ))
}
