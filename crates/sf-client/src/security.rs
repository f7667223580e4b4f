//! Security utilities for building SOQL text and REST URLs.
//!
//! ## SOQL literals
//!
//! Every value placed inside a SOQL string literal goes through
//! [`soql::quote_string`]. Only the two escape sequences `\\` and `\'` are
//! produced, which are the ones the query splitter accepts inside literals.
//!
//! ```rust
//! use busbar_sf_client::security::soql;
//!
//! let literal = soql::quote_string("O'Brien");
//! assert_eq!(literal, r"'O\'Brien'");
//! ```
//!
//! ## URL path segments
//!
//! Record IDs and object names are validated before they become part of a path:
//!
//! ```rust
//! use busbar_sf_client::security::url;
//!
//! assert_eq!(
//!     url::sobject_path("Account", "001000000000001AAA"),
//!     Some("sobjects/Account/001000000000001AAA".to_string())
//! );
//! assert_eq!(url::sobject_path("Account", "../../etc"), None);
//! ```

/// SOQL escaping utilities for injection prevention.
pub mod soql {
    /// Escape a string value for use inside a SOQL string literal.
    ///
    /// Single quotes become `\'` and backslashes become `\\`. Everything
    /// else, control characters included, is kept verbatim.
    #[must_use]
    pub fn escape_string(value: &str) -> String {
        let mut escaped = String::with_capacity(value.len() + 8);
        for ch in value.chars() {
            match ch {
                '\'' => escaped.push_str("\\'"),
                '\\' => escaped.push_str("\\\\"),
                _ => escaped.push(ch),
            }
        }
        escaped
    }

    /// Escape a value and wrap it in single quotes.
    #[must_use]
    pub fn quote_string(value: &str) -> String {
        format!("'{}'", escape_string(value))
    }

    /// Validate that a field name contains only safe characters.
    ///
    /// Field names should only contain alphanumeric characters, underscores,
    /// and the `__c` / `__r` suffixes for custom fields/relationships.
    ///
    /// # Example
    ///
    /// ```rust
    /// use busbar_sf_client::security::soql;
    ///
    /// assert!(soql::is_safe_field_name("Account"));
    /// assert!(soql::is_safe_field_name("Custom_Field__c"));
    /// assert!(!soql::is_safe_field_name("Bad'; DROP TABLE--"));
    /// ```
    #[must_use]
    pub fn is_safe_field_name(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() => {}
            _ => return false,
        }
        chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    }

    /// Validate that a SObject name is safe.
    ///
    /// SObject names follow the same rules as field names.
    #[must_use]
    pub fn is_safe_sobject_name(name: &str) -> bool {
        is_safe_field_name(name)
    }
}

/// URL encoding utilities for parameter safety.
pub mod url {
    /// URL-encode a parameter value.
    #[must_use]
    pub fn encode_param(value: &str) -> String {
        urlencoding::encode(value).into_owned()
    }

    /// Validate that a Salesforce ID has the correct format.
    ///
    /// Salesforce IDs are either 15 or 18 characters and contain only
    /// alphanumeric characters.
    #[must_use]
    pub fn is_valid_salesforce_id(id: &str) -> bool {
        let len = id.len();
        (len == 15 || len == 18) && id.chars().all(|c| c.is_ascii_alphanumeric())
    }

    /// Build a safe SObject URL path, relative to the REST API root.
    ///
    /// Returns `None` when either the object name or the ID is malformed.
    #[must_use]
    pub fn sobject_path(sobject: &str, id: &str) -> Option<String> {
        use super::soql::is_safe_sobject_name;

        if !is_safe_sobject_name(sobject) || !is_valid_salesforce_id(id) {
            return None;
        }
        Some(format!("sobjects/{}/{}", sobject, id))
    }
}
