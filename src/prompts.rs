//! Instructions sent to the remote generative backend.
//!
//! The conversion session is seeded with the uploaded PDF plus
//! [`CONVERTER_INSTRUCTION`]; [`CONVERT_REQUEST`] is then sent as the
//! follow-up turn that asks for the output.

/// Seed message that sits next to the uploaded file in the first user turn.
pub const CONVERTER_INSTRUCTION: &str =
    "You are a PDF to markdown converter. Convert this PDF document into a valid markdown document.";

/// Follow-up turn that triggers the conversion.
pub const CONVERT_REQUEST: &str = "Convert the PDF to markdown format.";

/// MIME type declared for every upload.
pub const PDF_MIME: &str = "application/pdf";
