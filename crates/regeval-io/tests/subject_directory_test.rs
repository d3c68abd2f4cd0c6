use std::fs;
use std::path::Path;

use anyhow::Result;
use ndarray::{ArrayD, IxDyn};
use regeval_core::{BatchSource, ErrorKind, Role};
use regeval_io::{write_nifti_array, SubjectDirectory};
use tempfile::tempdir;

fn write(path: &Path, shape: &[usize], value: f32) -> Result<()> {
    let array = ArrayD::from_elem(IxDyn(shape), value);
    write_nifti_array(path, array.view())
}

#[test]
fn test_loads_2d_subject() -> Result<()> {
    let root = tempdir()?;
    let subject = root.path().join("subj_01");
    fs::create_dir_all(&subject)?;
    write(&subject.join("dvf_pred.nii.gz"), &[8, 6, 3, 2], 0.5)?;
    write(&subject.join("dvf_gt.nii.gz"), &[8, 6, 3, 2], 0.0)?;
    write(&subject.join("target.nii.gz"), &[8, 6, 3], 1.0)?;
    write(&subject.join("roi_mask.nii"), &[8, 6, 3], 1.0)?;
    fs::write(subject.join("log.txt"), "not an image")?;
    write(&subject.join("attention_map.nii.gz"), &[8, 6, 3], 1.0)?;
    // a stray file at the root is not a subject
    fs::write(root.path().join("README"), "")?;

    let source = SubjectDirectory::new(root.path());
    assert_eq!(source.subject_ids()?, vec!["subj_01".to_string()]);

    let batch = source.load("subj_01")?;
    let roles: Vec<Role> = batch.roles().collect();
    assert_eq!(roles.len(), 4);
    assert_eq!(batch.get(Role::DvfPred)?.shape(), &[3, 2, 8, 6]);
    assert_eq!(batch.get(Role::Target)?.shape(), &[3, 1, 8, 6]);
    assert_eq!(batch.num_samples(), Some(3));
    Ok(())
}

#[test]
fn test_loads_3d_subject() -> Result<()> {
    let root = tempdir()?;
    let subject = root.path().join("vol");
    fs::create_dir_all(&subject)?;
    write(&subject.join("dvf_gt.nii.gz"), &[5, 6, 7, 3], 1.0)?;
    write(&subject.join("target_seg.nii.gz"), &[5, 6, 7], 2.0)?;

    let batch = SubjectDirectory::new(root.path()).load("vol")?;
    assert_eq!(batch.get(Role::DvfGt)?.shape(), &[1, 3, 5, 6, 7]);
    assert_eq!(batch.spatial_shape(), Some(&[5usize, 6, 7][..]));
    Ok(())
}

#[test]
fn test_image_only_subject_needs_explicit_dims() -> Result<()> {
    let root = tempdir()?;
    let subject = root.path().join("s");
    fs::create_dir_all(&subject)?;
    write(&subject.join("target.nii"), &[4, 4, 2], 0.0)?;
    write(&subject.join("target_pred.nii"), &[4, 4, 2], 1.0)?;

    let err = SubjectDirectory::new(root.path()).load("s").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);

    let batch = SubjectDirectory::new(root.path()).with_spatial_dims(2)?.load("s")?;
    assert_eq!(batch.get(Role::TargetPred)?.shape(), &[2, 1, 4, 4]);
    Ok(())
}

#[test]
fn test_missing_subject_is_load_error() {
    let root = tempdir().unwrap();
    let err = SubjectDirectory::new(root.path()).load("nobody").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(err.to_string().contains("nobody"));
}
