//! Macro that turns a table description into a `TableSchema` constructor.

/// Declare a built-in table descriptor.
///
/// ```ignore
/// define_table! {
///     fn events => "events", recency: ts {
///         ts: Timestamp => "event time",
///         level: Text ["INFO", "WARN"] => "severity",
///     }
/// }
/// ```
#[macro_export]
macro_rules! define_table {
    (
        $(#[$meta:meta])*
        fn $fn_name:ident => $table:literal, recency: $recency:ident {
            $(
                $field:ident : $kind:ident $( [ $( $example:literal ),* ] )? => $desc:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        pub fn $fn_name() -> $crate::TableSchema {
            $crate::TableSchema {
                name: $table.to_string(),
                recency_field: stringify!($recency).to_string(),
                fields: vec![
                    $(
                        $crate::FieldSpec {
                            name: stringify!($field).to_string(),
                            kind: $crate::FieldKind::$kind,
                            description: $desc.to_string(),
                            examples: vec![$($($example.to_string()),*)?],
                        }
                    ),*
                ],
            }
        }
    };
}
