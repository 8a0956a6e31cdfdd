//! Windows onto session content

pub mod viewport;
