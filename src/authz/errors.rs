use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(warden::authz::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(warden::authz::invalid_policy),
        help("Each policy file may contain `level` and `route` KDL nodes")
    )]
    InvalidPolicy(String),

    #[error("Undefined level `{0}`")]
    #[diagnostic(
        code(warden::authz::undefined_level),
        help("Known levels are M1, M2, M3A, M3B, M3C, L1, L2, L3 and S1")
    )]
    UndefinedLevel(String),

    #[error("Level `{0}` is defined more than once")]
    #[diagnostic(code(warden::authz::duplicate_level))]
    DuplicateLevel(String),

    #[error("Level `{0}` has no definition")]
    #[diagnostic(
        code(warden::authz::missing_level),
        help("Every level needs a node: level \"<code>\" rank=<n> {{ ... }}")
    )]
    MissingLevel(String),

    #[error("Cyclic level inclusion detected: {0}")]
    #[diagnostic(
        code(warden::authz::cyclic_inclusion),
        help("Check the `includes` lists in your level definitions for circular references")
    )]
    CyclicInclusion(String),

    #[error("Level `{upper}` (rank {upper_rank}) includes `{lower}` (rank {lower_rank})")]
    #[diagnostic(
        code(warden::authz::rank_inversion),
        help("A level may only include levels of strictly lower rank")
    )]
    RankInversion {
        upper: String,
        upper_rank: i64,
        lower: String,
        lower_rank: i64,
    },

    #[error("Administrative levels do not form the chain L1 < L2 < L3 < S1: {0}")]
    #[diagnostic(code(warden::authz::admin_chain))]
    AdminChainBroken(String),

    #[error("S1 does not subsume `{0}`")]
    #[diagnostic(
        code(warden::authz::system_superset),
        help("S1 must include, directly or transitively, every other level")
    )]
    SystemNotSuperset(String),

    #[error("Invalid elevation target `{0}`")]
    #[diagnostic(
        code(warden::authz::invalid_elevation_target),
        help("Elevation targets must be one of L1, L2, L3 or S1")
    )]
    InvalidElevationTarget(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(warden::authz::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev for the format")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(warden::authz::io))]
    Io(#[from] std::io::Error),
}
