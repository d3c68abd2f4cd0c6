pub mod nifti_io;
pub mod subject;

pub use nifti_io::{read_nifti_array, write_nifti_array};
pub use subject::SubjectDirectory;
