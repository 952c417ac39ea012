//! The forms the feed client renders, with their client-side rules.

use super::{FieldSpec, FormState, InputKind, Rule};

pub fn login() -> FormState {
    FormState::new(vec![
        FieldSpec::new("email", "Email", InputKind::Email)
            .rule(Rule::min_length(1, "Email is a required field"))
            .rule(Rule::email("Email must be a valid email address")),
        FieldSpec::new("password", "Password", InputKind::Password)
            .rule(Rule::min_length(8, "Password must be at least 8 characters")),
    ])
}

pub fn register() -> FormState {
    FormState::new(vec![
        FieldSpec::new("display_name", "Display Name", InputKind::Text)
            .rule(Rule::min_length(3, "Display name is a required field"))
            .rule(Rule::max_length(255, "Display name must be less than 255 characters")),
        FieldSpec::new("username", "Username", InputKind::Text)
            .rule(Rule::min_length(3, "Username is a required field"))
            .rule(Rule::max_length(255, "Username must be less than 255 characters")),
        FieldSpec::new("email", "Email", InputKind::Email)
            .rule(Rule::min_length(1, "Email is a required field"))
            .rule(Rule::email("Email must be a valid email address"))
            .rule(Rule::max_length(512, "Email must be less than 512 characters")),
        FieldSpec::new("password", "Password", InputKind::Password)
            .rule(Rule::min_length(8, "Password must be at least 8 characters")),
        FieldSpec::new("confirm_password", "Confirm Password", InputKind::Password)
            .rule(Rule::matches("password", "Passwords do not match")),
    ])
}

pub fn verification() -> FormState {
    FormState::new(vec![FieldSpec::new("code", "Verification Code", InputKind::Text)
        .rule(Rule::min_length(6, "String must contain at least 6 character(s)"))
        .rule(Rule::max_length(6, "String must contain at most 6 character(s)"))])
}

/// Composer for a new post, or a reply when `reply` is set.
pub fn post(reply: bool) -> FormState {
    let label = if reply { "Reply" } else { "Post" };
    FormState::new(vec![FieldSpec::new("content", label, InputKind::Multiline)
        .rule(Rule::min_length(1, "Content is a required field."))
        .rule(Rule::max_length(512, "Content must be less than 512 characters."))])
}
