//! Capability Registry
//!
//! The single source of truth for what a sandboxed script can reach:
//!
//! 1. **Primitives** - a handful of safe builtins (`len`, `min`, `round`, ...)
//! 2. **Libraries** - named handles (`pd`, `np`, `scipy`) whose members are
//!    enumerated here, not looked up on a real module
//! 3. **Object surface** - the Series / DataFrame / `.str` members scripts may
//!    call on values they already hold
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CapabilityRegistry (process-wide, immutable, OnceLock)     │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  sandbox_builder::build      │  CapabilityRegistry::describe│
//! │  binds every capability      │  renders the same tables for │
//! │  into a fresh namespace      │  the planner prompt          │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! The interpreter dispatches on the enums below with exhaustive matches, so a
//! name that is documented is a name that is implemented.

use std::sync::OnceLock;

/// Name under which the private dataset copy is bound in every sandbox.
pub const DATASET_BINDING: &str = "df";

// ============================================================================
// PRIMITIVES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Range,
    Len,
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    Set,
    Tuple,
    Abs,
    Max,
    Min,
    Sum,
    Round,
    Sorted,
}

impl Builtin {
    pub const ALL: &'static [Builtin] = &[
        Builtin::Print,
        Builtin::Range,
        Builtin::Len,
        Builtin::Str,
        Builtin::Int,
        Builtin::Float,
        Builtin::Bool,
        Builtin::List,
        Builtin::Dict,
        Builtin::Set,
        Builtin::Tuple,
        Builtin::Abs,
        Builtin::Max,
        Builtin::Min,
        Builtin::Sum,
        Builtin::Round,
        Builtin::Sorted,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Range => "range",
            Builtin::Len => "len",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Dict => "dict",
            Builtin::Set => "set",
            Builtin::Tuple => "tuple",
            Builtin::Abs => "abs",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Sum => "sum",
            Builtin::Round => "round",
            Builtin::Sorted => "sorted",
        }
    }

    pub fn usage(self) -> &'static str {
        match self {
            Builtin::Print => "print(*values) - write to the captured execution log",
            Builtin::Range => "range(stop) / range(start, stop[, step]) - integer list",
            Builtin::Len => "len(x) - length of a str, list, dict, Series or DataFrame (rows)",
            Builtin::Str => "str(x) - text conversion",
            Builtin::Int => "int(x) - integer conversion (truncates floats)",
            Builtin::Float => "float(x) - float conversion",
            Builtin::Bool => "bool(x) - truthiness",
            Builtin::List => "list(x) - list from a list, tuple, str, Series or DataFrame (column names)",
            Builtin::Dict => "dict(pairs_or_mapping, **kw) - dict from a mapping, (key, value) pairs or keywords",
            Builtin::Set => "set(iterable) - distinct values, in first-seen order",
            Builtin::Tuple => "tuple(iterable) - tuple from any iterable",
            Builtin::Abs => "abs(x) - absolute value",
            Builtin::Max => "max(iterable) / max(a, b, ...) - largest value",
            Builtin::Min => "min(iterable) / min(a, b, ...) - smallest value",
            Builtin::Sum => "sum(iterable) - numeric sum",
            Builtin::Round => "round(x[, ndigits]) - rounding",
            Builtin::Sorted => "sorted(iterable, reverse=False) - sorted list",
        }
    }
}

// ============================================================================
// LIBRARIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Library {
    Pandas,
    Numpy,
    Scipy,
    ScipyStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryFn {
    PdIsna,
    PdNotna,
    PdToNumeric,
    NpLog,
    NpLog1p,
    NpExp,
    NpSqrt,
    NpAbs,
    NpFloor,
    NpCeil,
    NpRound,
    NpWhere,
    NpIsnan,
    NpMean,
    NpMedian,
    NpStd,
    NpClip,
    StatsZscore,
    StatsIqr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryConst {
    Nan,
    Inf,
    Pi,
    Na,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryMember {
    Function(LibraryFn),
    Constant(LibraryConst),
    Module(Library),
}

/// `(name, member, usage)` rows for one library handle.
type MemberTable = &'static [(&'static str, LibraryMember, &'static str)];

const PANDAS_MEMBERS: MemberTable = &[
    ("isna", LibraryMember::Function(LibraryFn::PdIsna), "pd.isna(x) - missing mask for a scalar or Series"),
    ("isnull", LibraryMember::Function(LibraryFn::PdIsna), "pd.isnull(x) - alias of pd.isna"),
    ("notna", LibraryMember::Function(LibraryFn::PdNotna), "pd.notna(x) - inverse of pd.isna"),
    ("notnull", LibraryMember::Function(LibraryFn::PdNotna), "pd.notnull(x) - alias of pd.notna"),
    ("to_numeric", LibraryMember::Function(LibraryFn::PdToNumeric), "pd.to_numeric(x, errors='raise'|'coerce') - parse text as numbers"),
    ("NA", LibraryMember::Constant(LibraryConst::Na), "pd.NA - missing value marker"),
];

const NUMPY_MEMBERS: MemberTable = &[
    ("nan", LibraryMember::Constant(LibraryConst::Nan), "np.nan - missing float"),
    ("inf", LibraryMember::Constant(LibraryConst::Inf), "np.inf - positive infinity"),
    ("pi", LibraryMember::Constant(LibraryConst::Pi), "np.pi"),
    ("log", LibraryMember::Function(LibraryFn::NpLog), "np.log(x) - natural log, element-wise"),
    ("log1p", LibraryMember::Function(LibraryFn::NpLog1p), "np.log1p(x) - log(1 + x), element-wise"),
    ("exp", LibraryMember::Function(LibraryFn::NpExp), "np.exp(x) - element-wise"),
    ("sqrt", LibraryMember::Function(LibraryFn::NpSqrt), "np.sqrt(x) - element-wise"),
    ("abs", LibraryMember::Function(LibraryFn::NpAbs), "np.abs(x) - element-wise"),
    ("floor", LibraryMember::Function(LibraryFn::NpFloor), "np.floor(x) - element-wise"),
    ("ceil", LibraryMember::Function(LibraryFn::NpCeil), "np.ceil(x) - element-wise"),
    ("round", LibraryMember::Function(LibraryFn::NpRound), "np.round(x, decimals=0) - element-wise"),
    ("where", LibraryMember::Function(LibraryFn::NpWhere), "np.where(cond, a, b) - choose element-wise"),
    ("isnan", LibraryMember::Function(LibraryFn::NpIsnan), "np.isnan(x) - missing mask"),
    ("mean", LibraryMember::Function(LibraryFn::NpMean), "np.mean(x) - mean ignoring missing"),
    ("median", LibraryMember::Function(LibraryFn::NpMedian), "np.median(x) - median ignoring missing"),
    ("std", LibraryMember::Function(LibraryFn::NpStd), "np.std(x) - population standard deviation"),
    ("clip", LibraryMember::Function(LibraryFn::NpClip), "np.clip(x, lo, hi) - bound values"),
];

const SCIPY_MEMBERS: MemberTable = &[(
    "stats",
    LibraryMember::Module(Library::ScipyStats),
    "scipy.stats - statistics namespace",
)];

const SCIPY_STATS_MEMBERS: MemberTable = &[
    ("zscore", LibraryMember::Function(LibraryFn::StatsZscore), "scipy.stats.zscore(x, ddof=0) - standard scores"),
    ("iqr", LibraryMember::Function(LibraryFn::StatsIqr), "scipy.stats.iqr(x) - interquartile range"),
];

impl Library {
    pub fn bound_name(self) -> &'static str {
        match self {
            Library::Pandas => "pd",
            Library::Numpy => "np",
            Library::Scipy => "scipy",
            Library::ScipyStats => "scipy.stats",
        }
    }

    pub fn usage(self) -> &'static str {
        match self {
            Library::Pandas => "pandas subset",
            Library::Numpy => "numpy subset (element-wise on Series)",
            Library::Scipy => "scipy subset",
            Library::ScipyStats => "scipy.stats subset",
        }
    }

    fn table(self) -> MemberTable {
        match self {
            Library::Pandas => PANDAS_MEMBERS,
            Library::Numpy => NUMPY_MEMBERS,
            Library::Scipy => SCIPY_MEMBERS,
            Library::ScipyStats => SCIPY_STATS_MEMBERS,
        }
    }

    /// Resolve `handle.name`. Anything outside the table does not exist.
    pub fn member(self, name: &str) -> Option<LibraryMember> {
        self.table()
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, m, _)| *m)
    }

    pub fn member_names(self) -> impl Iterator<Item = &'static str> {
        self.table().iter().map(|(n, _, _)| *n)
    }
}

impl LibraryFn {
    /// Dotted name used in error messages.
    pub fn qualified_name(self) -> &'static str {
        match self {
            LibraryFn::PdIsna => "pd.isna",
            LibraryFn::PdNotna => "pd.notna",
            LibraryFn::PdToNumeric => "pd.to_numeric",
            LibraryFn::NpLog => "np.log",
            LibraryFn::NpLog1p => "np.log1p",
            LibraryFn::NpExp => "np.exp",
            LibraryFn::NpSqrt => "np.sqrt",
            LibraryFn::NpAbs => "np.abs",
            LibraryFn::NpFloor => "np.floor",
            LibraryFn::NpCeil => "np.ceil",
            LibraryFn::NpRound => "np.round",
            LibraryFn::NpWhere => "np.where",
            LibraryFn::NpIsnan => "np.isnan",
            LibraryFn::NpMean => "np.mean",
            LibraryFn::NpMedian => "np.median",
            LibraryFn::NpStd => "np.std",
            LibraryFn::NpClip => "np.clip",
            LibraryFn::StatsZscore => "scipy.stats.zscore",
            LibraryFn::StatsIqr => "scipy.stats.iqr",
        }
    }
}

// ============================================================================
// OBJECT SURFACE - members callable on values a script already holds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesMember {
    Fillna,
    Dropna,
    Isna,
    Isnull,
    Notna,
    Notnull,
    Mean,
    Median,
    Sum,
    Min,
    Max,
    Std,
    Var,
    Count,
    Nunique,
    Mode,
    Quantile,
    Abs,
    Round,
    Clip,
    Astype,
    Replace,
    Map,
    Isin,
    Unique,
    Tolist,
    Any,
    All,
    Copy,
    Dtype,
    Shape,
    Size,
    Str,
}

impl SeriesMember {
    pub const ALL: &'static [SeriesMember] = &[
        SeriesMember::Fillna,
        SeriesMember::Dropna,
        SeriesMember::Isna,
        SeriesMember::Isnull,
        SeriesMember::Notna,
        SeriesMember::Notnull,
        SeriesMember::Mean,
        SeriesMember::Median,
        SeriesMember::Sum,
        SeriesMember::Min,
        SeriesMember::Max,
        SeriesMember::Std,
        SeriesMember::Var,
        SeriesMember::Count,
        SeriesMember::Nunique,
        SeriesMember::Mode,
        SeriesMember::Quantile,
        SeriesMember::Abs,
        SeriesMember::Round,
        SeriesMember::Clip,
        SeriesMember::Astype,
        SeriesMember::Replace,
        SeriesMember::Map,
        SeriesMember::Isin,
        SeriesMember::Unique,
        SeriesMember::Tolist,
        SeriesMember::Any,
        SeriesMember::All,
        SeriesMember::Copy,
        SeriesMember::Dtype,
        SeriesMember::Shape,
        SeriesMember::Size,
        SeriesMember::Str,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SeriesMember::Fillna => "fillna",
            SeriesMember::Dropna => "dropna",
            SeriesMember::Isna => "isna",
            SeriesMember::Isnull => "isnull",
            SeriesMember::Notna => "notna",
            SeriesMember::Notnull => "notnull",
            SeriesMember::Mean => "mean",
            SeriesMember::Median => "median",
            SeriesMember::Sum => "sum",
            SeriesMember::Min => "min",
            SeriesMember::Max => "max",
            SeriesMember::Std => "std",
            SeriesMember::Var => "var",
            SeriesMember::Count => "count",
            SeriesMember::Nunique => "nunique",
            SeriesMember::Mode => "mode",
            SeriesMember::Quantile => "quantile",
            SeriesMember::Abs => "abs",
            SeriesMember::Round => "round",
            SeriesMember::Clip => "clip",
            SeriesMember::Astype => "astype",
            SeriesMember::Replace => "replace",
            SeriesMember::Map => "map",
            SeriesMember::Isin => "isin",
            SeriesMember::Unique => "unique",
            SeriesMember::Tolist => "tolist",
            SeriesMember::Any => "any",
            SeriesMember::All => "all",
            SeriesMember::Copy => "copy",
            SeriesMember::Dtype => "dtype",
            SeriesMember::Shape => "shape",
            SeriesMember::Size => "size",
            SeriesMember::Str => "str",
        }
    }

    /// Attributes are read without a call.
    pub fn is_property(self) -> bool {
        matches!(
            self,
            SeriesMember::Dtype | SeriesMember::Shape | SeriesMember::Size | SeriesMember::Str
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameMember {
    Columns,
    Shape,
    Loc,
    Dropna,
    DropDuplicates,
    Duplicated,
    Drop,
    Rename,
    Fillna,
    Copy,
    Head,
    Tail,
    ResetIndex,
    SortValues,
}

impl FrameMember {
    pub const ALL: &'static [FrameMember] = &[
        FrameMember::Columns,
        FrameMember::Shape,
        FrameMember::Loc,
        FrameMember::Dropna,
        FrameMember::DropDuplicates,
        FrameMember::Duplicated,
        FrameMember::Drop,
        FrameMember::Rename,
        FrameMember::Fillna,
        FrameMember::Copy,
        FrameMember::Head,
        FrameMember::Tail,
        FrameMember::ResetIndex,
        FrameMember::SortValues,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FrameMember::Columns => "columns",
            FrameMember::Shape => "shape",
            FrameMember::Loc => "loc",
            FrameMember::Dropna => "dropna",
            FrameMember::DropDuplicates => "drop_duplicates",
            FrameMember::Duplicated => "duplicated",
            FrameMember::Drop => "drop",
            FrameMember::Rename => "rename",
            FrameMember::Fillna => "fillna",
            FrameMember::Copy => "copy",
            FrameMember::Head => "head",
            FrameMember::Tail => "tail",
            FrameMember::ResetIndex => "reset_index",
            FrameMember::SortValues => "sort_values",
        }
    }

    pub fn is_property(self) -> bool {
        matches!(
            self,
            FrameMember::Columns | FrameMember::Shape | FrameMember::Loc
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrMethod {
    Strip,
    Lower,
    Upper,
    Title,
    Replace,
    Contains,
    Startswith,
    Endswith,
    Len,
}

impl StrMethod {
    pub const ALL: &'static [StrMethod] = &[
        StrMethod::Strip,
        StrMethod::Lower,
        StrMethod::Upper,
        StrMethod::Title,
        StrMethod::Replace,
        StrMethod::Contains,
        StrMethod::Startswith,
        StrMethod::Endswith,
        StrMethod::Len,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StrMethod::Strip => "strip",
            StrMethod::Lower => "lower",
            StrMethod::Upper => "upper",
            StrMethod::Title => "title",
            StrMethod::Replace => "replace",
            StrMethod::Contains => "contains",
            StrMethod::Startswith => "startswith",
            StrMethod::Endswith => "endswith",
            StrMethod::Len => "len",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Primitive(Builtin),
    Library(Library),
}

/// A named binding exposed inside every sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub name: &'static str,
    pub kind: CapabilityKind,
}

impl Capability {
    pub fn usage(&self) -> &'static str {
        match self.kind {
            CapabilityKind::Primitive(b) => b.usage(),
            CapabilityKind::Library(l) => l.usage(),
        }
    }
}

/// Immutable table of every capability, in binding order.
#[derive(Debug)]
pub struct CapabilityRegistry {
    entries: Vec<Capability>,
}

static REGISTRY: OnceLock<CapabilityRegistry> = OnceLock::new();

/// The process-wide registry, built on first use and never mutated.
pub fn registry() -> &'static CapabilityRegistry {
    REGISTRY.get_or_init(CapabilityRegistry::standard)
}

impl CapabilityRegistry {
    fn standard() -> Self {
        let mut entries: Vec<Capability> = Builtin::ALL
            .iter()
            .map(|&b| Capability {
                name: b.name(),
                kind: CapabilityKind::Primitive(b),
            })
            .collect();
        for lib in [Library::Pandas, Library::Numpy, Library::Scipy] {
            entries.push(Capability {
                name: lib.bound_name(),
                kind: CapabilityKind::Library(lib),
            });
        }
        Self { entries }
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.entries.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map a planner-declared library requirement (`pandas`, `numpy`, `np`,
    /// `scipy.stats`, ...) to the capability that satisfies it.
    pub fn resolve_requirement(&self, requirement: &str) -> Option<&Capability> {
        let req = requirement.trim().to_ascii_lowercase();
        let bound = match req.as_str() {
            "pandas" => "pd",
            "numpy" => "np",
            "scipy.stats" => "scipy",
            other => other,
        };
        self.get(bound)
    }

    /// Plain-text description of the whole sandbox surface, for the planner.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Sandbox surface. The dataset is bound as `{}`; assign the result back to it.\n",
            DATASET_BINDING
        ));
        out.push_str("Import statements, dunder names, and anything not listed here are rejected.\n\n");

        out.push_str("Primitives:\n");
        for cap in self.entries.iter() {
            if let CapabilityKind::Primitive(b) = cap.kind {
                out.push_str(&format!("  {}\n", b.usage()));
            }
        }

        out.push_str("\nLibraries:\n");
        for cap in self.entries.iter() {
            if let CapabilityKind::Library(lib) = cap.kind {
                describe_library(&mut out, lib);
            }
        }

        out.push_str("\nSeries members:\n  ");
        out.push_str(&join_names(SeriesMember::ALL.iter().map(|m| m.name())));
        out.push_str("\nSeries.str methods:\n  ");
        out.push_str(&join_names(StrMethod::ALL.iter().map(|m| m.name())));
        out.push_str("\nDataFrame members:\n  ");
        out.push_str(&join_names(FrameMember::ALL.iter().map(|m| m.name())));
        out.push('\n');
        out
    }
}

fn describe_library(out: &mut String, lib: Library) {
    out.push_str(&format!("  {} - {}\n", lib.bound_name(), lib.usage()));
    for (_, member, usage) in lib.table() {
        out.push_str(&format!("    {}\n", usage));
        if let LibraryMember::Module(sub) = member {
            for (_, _, sub_usage) in sub.table() {
                out.push_str(&format!("      {}\n", sub_usage));
            }
        }
    }
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_excludes_host_access() {
        let reg = registry();
        for name in [
            "open",
            "eval",
            "exec",
            "compile",
            "getattr",
            "globals",
            "os",
            "sys",
            "subprocess",
            "socket",
            "__import__",
            "__builtins__",
        ] {
            assert!(!reg.contains(name), "{} must not be a capability", name);
        }
    }

    #[test]
    fn test_registry_is_process_wide() {
        assert!(std::ptr::eq(registry(), registry()));
        assert!(registry().contains("len"));
        assert!(registry().contains("np"));
        assert!(!registry().contains(DATASET_BINDING));
    }

    #[test]
    fn test_resolve_requirement_aliases() {
        let reg = registry();
        assert_eq!(reg.resolve_requirement("numpy").unwrap().name, "np");
        assert_eq!(reg.resolve_requirement(" Pandas ").unwrap().name, "pd");
        assert_eq!(reg.resolve_requirement("scipy.stats").unwrap().name, "scipy");
        assert!(reg.resolve_requirement("sklearn").is_none());
    }

    #[test]
    fn test_library_members_are_enumerated() {
        assert_eq!(
            Library::Numpy.member("nan"),
            Some(LibraryMember::Constant(LibraryConst::Nan))
        );
        assert_eq!(
            Library::Scipy.member("stats"),
            Some(LibraryMember::Module(Library::ScipyStats))
        );
        assert!(Library::Numpy.member("load").is_none());
        assert!(Library::Pandas.member("read_csv").is_none());
    }

    #[test]
    fn test_member_names_round_trip() {
        for m in SeriesMember::ALL {
            assert_eq!(SeriesMember::from_name(m.name()), Some(*m));
        }
        for m in FrameMember::ALL {
            assert_eq!(FrameMember::from_name(m.name()), Some(*m));
        }
        for m in StrMethod::ALL {
            assert_eq!(StrMethod::from_name(m.name()), Some(*m));
        }
        assert!(FrameMember::from_name("to_csv").is_none());
    }

    #[test]
    fn test_describe_lists_every_capability() {
        let text = registry().describe();
        for cap in registry().capabilities() {
            assert!(text.contains(cap.usage()), "missing {}", cap.name);
        }
        assert!(text.contains("scipy.stats.zscore"));
        assert!(text.contains("drop_duplicates"));
        assert!(text.contains("`df`"));
    }
}
