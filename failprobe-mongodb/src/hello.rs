//! Conversion of `hello` replies into server descriptions

use failprobe_core::{ServerAddress, ServerDescription, TopologyVersion};
use mongodb::bson::{Bson, Document};

fn flag(reply: &Document, key: &str) -> bool {
    reply.get_bool(key).unwrap_or(false)
}

/// Whether the reply comes from a `mongos` router
pub fn is_sharded(reply: &Document) -> bool {
    matches!(reply.get_str("msg"), Ok("isdbgrid"))
}

fn topology_version(reply: &Document) -> Option<TopologyVersion> {
    let version = reply.get_document("topologyVersion").ok()?;
    let process_id = match version.get("processId")? {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        _ => return None,
    };
    let counter = match version.get("counter")? {
        Bson::Int64(n) => *n,
        Bson::Int32(n) => i64::from(*n),
        _ => return None,
    };
    Some(TopologyVersion::new(process_id, counter))
}

/// Describe `address` from a successful `hello` reply
pub fn parse_hello(address: &ServerAddress, reply: &Document) -> ServerDescription {
    let writable = flag(reply, "isWritablePrimary") || flag(reply, "ismaster");
    let secondary = flag(reply, "secondary");

    ServerDescription {
        address: address.clone(),
        topology_version: topology_version(reply),
        // Arbiters, ghosts and members in RECOVERING answer but serve no reads
        is_readable: writable || secondary,
        is_writable: writable,
        server_type_known: true,
    }
}

/// Members named by a `hello` reply, or `seeds` when the reply lists none
/// (standalone servers and `mongos`)
pub fn discover_members(reply: &Document, seeds: &[String]) -> Vec<String> {
    let mut members: Vec<String> = ["hosts", "passives", "arbiters"]
        .iter()
        .filter_map(|key| reply.get_array(key).ok())
        .flatten()
        .filter_map(|host| host.as_str().map(str::to_string))
        .collect();

    if members.is_empty() {
        members = seeds.to_vec();
    }
    members.sort();
    members.dedup();
    members
}
