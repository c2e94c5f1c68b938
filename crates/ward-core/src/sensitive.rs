//! Administrative permission-management nodes subject to default deny.

pub const SENSITIVE_NODES: [&str; 5] = [
    "ward.perm.user.manage",
    "ward.perm.user.view",
    "ward.perm.user.format",
    "ward.perm.reload",
    "ward.perm.*",
];

pub fn is_sensitive_node(node: &str) -> bool {
    SENSITIVE_NODES.contains(&node)
}
