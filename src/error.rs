use quick_error::quick_error;
use std::io::Error as IOError;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum ConnectomeError {
        /// Invalid NIfTI file: wrong header size or magic string.
        InvalidNiftiFormat {
            display("Invalid NIfTI-1 file")
        }

        /// The NIfTI datatype code is not supported by this crate.
        UnsupportedNiftiDatatype(code: i16) {
            display("Unsupported NIfTI datatype code: {}", code)
        }

        InvalidFsMghFormat {
            display("Invalid FreeSurfer MGH file")
        }

        UnsupportedFsMghDatatype(code: i32) {
            display("Unsupported FreeSurfer MGH datatype code: {}", code)
        }

        /// Two atlases were registered under the same display name.
        DuplicateAtlasName(name: String) {
            display("Duplicate atlas name: '{}'", name)
        }

        UnknownAtlasName(name: String) {
            display("Unknown atlas name: '{}'", name)
        }

        /// Arrays that must agree in shape do not.
        ShapeMismatch(msg: String) {
            display("Shape mismatch: {}", msg)
        }

        EmptyInput(what: String) {
            display("Empty input: {}", what)
        }

        InvalidThreshold(text: String) {
            display("Invalid edge threshold '{}', expected a number or a percentage like '80%'", text)
        }

        InvalidConfounds(msg: String) {
            display("Invalid confounds table: {}", msg)
        }

        /// A downloaded archive did not contain an expected file.
        MissingArchiveMember(name: String) {
            display("Archive member not found: {}", name)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            display("I/O error: {}", err)
            source(err)
        }

        Csv(err: csv::Error) {
            from()
            display("CSV error: {}", err)
            source(err)
        }

        Json(err: serde_json::Error) {
            from()
            display("JSON error: {}", err)
            source(err)
        }

        Http(err: reqwest::Error) {
            from()
            display("Download failed: {}", err)
            source(err)
        }

        Zip(err: zip::result::ZipError) {
            from()
            display("ZIP archive error: {}", err)
            source(err)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, ConnectomeError>;
