use anyhow::{Context, Result};
use ndarray::{ArrayD, ArrayViewD};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use std::path::Path;

/// Read a NIfTI file into an `f32` array.
///
/// Axes keep the file's dimension order `(x, y, z, ...)`; scaling from the
/// header (`scl_slope`, `scl_inter`) is applied by the reader. The result is
/// in standard (row-major) layout.
pub fn read_nifti_array<P: AsRef<Path>>(path: P) -> Result<ArrayD<f32>> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;

    let volume = obj.into_volume();
    let array = volume
        .into_ndarray::<f32>()
        .with_context(|| format!("Failed to convert {} to ndarray", path.display()))?;

    // The reader may hand back column-major memory.
    Ok(array.as_standard_layout().into_owned())
}

/// Write an array to a NIfTI file, axes in `(x, y, z, ...)` order.
pub fn write_nifti_array<P: AsRef<Path>>(path: P, array: ArrayViewD<'_, f32>) -> Result<()> {
    let path = path.as_ref();
    WriterOptions::new(path)
        .write_nifti(&array)
        .map_err(|e| anyhow::anyhow!("Failed to write NIfTI file {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};
    use tempfile::tempdir;

    #[test]
    fn test_nifti_roundtrip_3d() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("volume.nii");

        let data: Vec<f32> = (0..3 * 4 * 5).map(|x| x as f32).collect();
        let array = Array3::from_shape_vec((3, 4, 5), data)?.into_dyn();
        write_nifti_array(&file_path, array.view())?;

        let loaded = read_nifti_array(&file_path)?;
        assert_eq!(loaded.shape(), &[3, 4, 5]);
        assert_eq!(loaded[[0, 0, 0]], 0.0);
        assert_eq!(loaded[[2, 3, 4]], 59.0);
        assert_eq!(loaded[[1, 2, 3]], array[[1, 2, 3]]);
        Ok(())
    }

    #[test]
    fn test_nifti_roundtrip_vector_field() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("dvf.nii.gz");

        let array = Array4::from_shape_fn((4, 3, 2, 2), |(i, j, n, c)| {
            let sign = if c == 0 { 1.0 } else { -1.0 };
            (i * 100 + j * 10 + n) as f32 * sign
        })
        .into_dyn();
        write_nifti_array(&file_path, array.view())?;

        let loaded = read_nifti_array(&file_path)?;
        assert_eq!(loaded, array);
        Ok(())
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = read_nifti_array("/nonexistent/volume.nii").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read NIfTI file"));
    }
}
