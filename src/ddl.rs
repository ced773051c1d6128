// ABOUTME: Rewrites captured CREATE statements so they execute on the mirror
// ABOUTME: Strips schema qualifiers and definers, forces InnoDB and utf8mb4

use regex::Regex;
use std::sync::OnceLock;

use crate::utils::quote_mysql_ident;

/// Engine and row format every mirrored table is created with.
const MIRROR_ENGINE: &str = "ENGINE=InnoDB ROW_FORMAT=DYNAMIC";
const MIRROR_COLLATION: &str = "utf8mb4_unicode_ci";

struct Patterns {
    schema_qualifier: Regex,
    engine: Regex,
    row_format: Regex,
    legacy_collation: Regex,
    latin1: Regex,
    default_charset: Regex,
    table_collate: Regex,
    quoted_definer: Regex,
    bare_definer: Regex,
    security_definer: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |pattern: &str| Regex::new(pattern).expect("static pattern compiles");
        Patterns {
            schema_qualifier: re(r"`[^`]+`\."),
            engine: re(r"(?i)ENGINE=\w+"),
            row_format: re(r"(?i)\s*ROW_FORMAT=\w+"),
            legacy_collation: re(r"(?i)utf8mb4_uca1400_ai_ci|latin1_swedish_ci"),
            latin1: re(r"(?i)latin1"),
            default_charset: re(r"(?i)DEFAULT CHARSET=\w+"),
            table_collate: re(r"(?i)COLLATE=\w+"),
            quoted_definer: re(r"(?i)DEFINER=`[^`]+`@`[^`]+`"),
            bare_definer: re(r"(?i)DEFINER=[\w.%-]+@[\w.%-]+"),
            security_definer: re(r"(?i)SQL SECURITY DEFINER"),
        }
    })
}

/// Rewrite a primary's `SHOW CREATE TABLE` output for the mirror.
///
/// - drops `source_db` qualifiers (quoted and bare) and any other quoted
///   schema qualifier
/// - forces `ENGINE=InnoDB ROW_FORMAT=DYNAMIC`, dropping other row formats
/// - maps legacy single-byte charsets and collations to utf8mb4
///
/// # Examples
///
/// ```
/// use database_mirror::ddl::rewrite_create_table;
/// let sql = "CREATE TABLE `shop`.`t` (`id` int) ENGINE=MyISAM DEFAULT CHARSET=latin1";
/// assert_eq!(
///     rewrite_create_table(sql, "shop"),
///     "CREATE TABLE `t` (`id` int) ENGINE=InnoDB ROW_FORMAT=DYNAMIC DEFAULT CHARSET=utf8mb4"
/// );
/// ```
pub fn rewrite_create_table(sql: &str, source_db: &str) -> String {
    let p = patterns();

    let mut out = sql.replace(&format!("{}.", quote_mysql_ident(source_db)), "");
    if !source_db.is_empty() {
        out = out.replace(&format!("{}.", source_db), "");
    }
    out = p.schema_qualifier.replace_all(&out, "").into_owned();

    out = p.row_format.replace_all(&out, "").into_owned();
    out = p.engine.replace_all(&out, MIRROR_ENGINE).into_owned();

    out = p
        .legacy_collation
        .replace_all(&out, MIRROR_COLLATION)
        .into_owned();
    out = p.latin1.replace_all(&out, "utf8mb4").into_owned();
    out = p
        .default_charset
        .replace_all(&out, "DEFAULT CHARSET=utf8mb4")
        .into_owned();
    out = p
        .table_collate
        .replace_all(&out, format!("COLLATE={}", MIRROR_COLLATION).as_str())
        .into_owned();

    out
}

/// Remove `DEFINER=...` annotations; the mirror's user differs from the primary's.
pub fn strip_definer(sql: &str) -> String {
    let p = patterns();
    let out = p.quoted_definer.replace_all(sql, "");
    p.bare_definer.replace_all(&out, "").into_owned()
}

/// Switch definer-rights objects to invoker rights.
pub fn invoker_security(sql: &str) -> String {
    patterns()
        .security_definer
        .replace_all(sql, "SQL SECURITY INVOKER")
        .into_owned()
}

/// Prepare a captured view or routine definition for the mirror.
///
/// Only the primary's own schema qualifier is removed; other quoted
/// qualifiers in a view body are table qualifiers on columns.
pub fn prepare_object_definition(sql: &str, source_db: &str) -> String {
    let unqualified = if source_db.is_empty() {
        sql.to_string()
    } else {
        sql.replace(&format!("{}.", quote_mysql_ident(source_db)), "")
    };
    invoker_security(&strip_definer(&unqualified))
}
