//! Stemcell images: gzipped tarballs holding an OVF descriptor and its disks

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use log::debug;
use tar::Archive;

use crate::{
    error::{Error, Result},
    util::fs::find_with_extension,
};

/// Unpack `image` into `dest` and return the path of the OVF descriptor inside it
pub fn unpack_image(image: &Path, dest: &Path) -> Result<PathBuf> {
    let f = File::open(image).map_err(|e| Error::io(image, e))?;
    let gz = GzDecoder::new(f);
    let mut tar = Archive::new(gz);
    tar.unpack(dest).map_err(|e| Error::io(image, e))?;
    debug!(
        "Unpacked {} into {}",
        image.to_string_lossy(),
        dest.to_string_lossy()
    );

    find_with_extension(dest, "ovf")?.ok_or_else(|| {
        Error::InvalidArgument(format!(
            "no ovf descriptor in stemcell image {}",
            image.to_string_lossy()
        ))
    })
}

#[cfg(test)]
fn write_image(path: &Path, files: &[(&str, &[u8])]) {
    use flate2::{write::GzEncoder, Compression};

    let gz = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(gz);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *contents).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[test]
fn test_unpack_image_finds_ovf() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("image");
    write_image(
        &image,
        &[
            ("image.mf", b"SHA1(image.ovf)= 00"),
            ("image.ovf", b"<Envelope/>"),
            ("image-disk1.vmdk", b"vmdk"),
        ],
    );

    let dest = dir.path().join("unpacked");
    let ovf = unpack_image(&image, &dest).unwrap();
    assert_eq!(ovf, dest.join("image.ovf"));
    assert!(dest.join("image-disk1.vmdk").exists());
}

#[test]
fn test_unpack_image_without_ovf() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("image");
    write_image(&image, &[("image-disk1.vmdk", b"vmdk")]);

    let err = unpack_image(&image, &dir.path().join("unpacked")).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(matches!(
        unpack_image(&dir.path().join("missing"), dir.path()),
        Err(Error::Io { .. })
    ));
}
