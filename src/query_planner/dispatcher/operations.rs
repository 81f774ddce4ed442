//! Closed sets of the method names the dispatcher understands.

macro_rules! method_set {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),*
        }

        impl TryFrom<&str> for $name {
            /// The unrecognized method name
            type Error = String;

            fn try_from(name: &str) -> Result<Self, Self::Error> {
                match name {
                    $(stringify!($variant) => Ok($name::$variant),)*
                    other => Err(other.to_string()),
                }
            }
        }
    };
}

method_set!(
    /// Relational operators over sequences.
    QueryOperation {
        All,
        Any,
        Average,
        Concat,
        Contains,
        Count,
        DefaultIfEmpty,
        Distinct,
        Except,
        First,
        FirstOrDefault,
        GroupBy,
        GroupJoin,
        Intersect,
        Join,
        Last,
        LastOrDefault,
        Max,
        Min,
        OrderBy,
        OrderByDescending,
        ThenBy,
        ThenByDescending,
        Select,
        SelectMany,
        Single,
        SingleOrDefault,
        Skip,
        Sum,
        Take,
        Union,
        Where,
    }
);

method_set!(StringMethod {
    Contains,
    EndsWith,
    StartsWith,
    IndexOf,
    Insert,
    Remove,
    Replace,
    Substring,
    ToLower,
    ToUpper,
    ToString,
    Trim,
    TrimEnd,
    TrimStart,
});

method_set!(MathMethod {
    Abs,
    Exp,
    Floor,
    Log,
    Log10,
    Pow,
    Round,
    Sign,
    Sqrt,
});
