//! A fixed-size ISO9660 image holding a single file in its root directory
//!
//! Layout, in 2048 byte sectors: system area (0-15), primary volume descriptor (16),
//! set terminator (17), little and big endian path tables (18, 19), root directory
//! (20), file data from 21 to the end of the image.

use crate::error::{Error, Result};

pub const SECTOR_SIZE: usize = 2048;
/// Every image is exactly this large regardless of its contents
pub const IMAGE_SIZE: usize = 1024 * 1024;

const SECTORS: u32 = (IMAGE_SIZE / SECTOR_SIZE) as u32;
const PVD_SECTOR: usize = 16;
const TERMINATOR_SECTOR: usize = 17;
const L_PATH_TABLE_SECTOR: u32 = 18;
const M_PATH_TABLE_SECTOR: u32 = 19;
const ROOT_SECTOR: u32 = 20;
const DATA_SECTOR: u32 = 21;
const PATH_TABLE_SIZE: u32 = 10;
const STANDARD_ID: &[u8] = b"CD001";
const VOLUME_ID: &str = "CDROM";
const DIRECTORY_FLAG: u8 = 0x02;
/// 1970-01-01 00:00:00 UTC as a directory record date
const RECORD_DATE: [u8; 7] = [70, 1, 1, 0, 0, 0, 0];

/// Largest file that fits after the metadata sectors
pub const MAX_FILE_SIZE: usize = (SECTORS - DATA_SECTOR) as usize * SECTOR_SIZE;

fn both_u16(buf: &mut [u8], value: u16) {
    buf[0..2].copy_from_slice(&value.to_le_bytes());
    buf[2..4].copy_from_slice(&value.to_be_bytes());
}

fn both_u32(buf: &mut [u8], value: u32) {
    buf[0..4].copy_from_slice(&value.to_le_bytes());
    buf[4..8].copy_from_slice(&value.to_be_bytes());
}

fn le_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn padded(buf: &mut [u8], text: &str) {
    buf.fill(b' ');
    buf[..text.len()].copy_from_slice(text.as_bytes());
}

/// A directory record for `id`, padded to an even length
fn directory_record(id: &[u8], extent: u32, size: u32, flags: u8) -> Vec<u8> {
    let mut len = 33 + id.len();
    if len % 2 == 1 {
        len += 1;
    }

    let mut record = vec![0u8; len];
    record[0] = len as u8;
    both_u32(&mut record[2..10], extent);
    both_u32(&mut record[10..18], size);
    record[18..25].copy_from_slice(&RECORD_DATE);
    record[25] = flags;
    both_u16(&mut record[28..32], 1);
    record[32] = id.len() as u8;
    record[33..33 + id.len()].copy_from_slice(id);
    record
}

fn path_table(extent: u32, big_endian: bool) -> [u8; PATH_TABLE_SIZE as usize] {
    let mut table = [0u8; PATH_TABLE_SIZE as usize];
    table[0] = 1;
    if big_endian {
        table[2..6].copy_from_slice(&extent.to_be_bytes());
        table[6..8].copy_from_slice(&1u16.to_be_bytes());
    } else {
        table[2..6].copy_from_slice(&extent.to_le_bytes());
        table[6..8].copy_from_slice(&1u16.to_le_bytes());
    }
    table
}

fn sector(image: &mut [u8], index: usize) -> &mut [u8] {
    &mut image[index * SECTOR_SIZE..(index + 1) * SECTOR_SIZE]
}

/// Build an image whose root directory holds `name` (upper case d-characters) with
/// `contents`
pub fn build(name: &str, contents: &[u8]) -> Result<Vec<u8>> {
    if name.is_empty()
        || !name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
    {
        return Err(Error::Iso(format!("invalid file name {:?}", name)));
    }
    if contents.len() > MAX_FILE_SIZE {
        return Err(Error::Iso(format!(
            "{} bytes do not fit in a {} byte image",
            contents.len(),
            IMAGE_SIZE
        )));
    }

    let mut image = vec![0u8; IMAGE_SIZE];

    let pvd = sector(&mut image, PVD_SECTOR);
    pvd[0] = 1;
    pvd[1..6].copy_from_slice(STANDARD_ID);
    pvd[6] = 1;
    padded(&mut pvd[8..40], "");
    padded(&mut pvd[40..72], VOLUME_ID);
    both_u32(&mut pvd[80..88], SECTORS);
    both_u16(&mut pvd[120..124], 1);
    both_u16(&mut pvd[124..128], 1);
    both_u16(&mut pvd[128..132], SECTOR_SIZE as u16);
    both_u32(&mut pvd[132..140], PATH_TABLE_SIZE);
    pvd[140..144].copy_from_slice(&L_PATH_TABLE_SECTOR.to_le_bytes());
    pvd[148..152].copy_from_slice(&M_PATH_TABLE_SECTOR.to_be_bytes());
    pvd[156..190].copy_from_slice(&directory_record(
        &[0],
        ROOT_SECTOR,
        SECTOR_SIZE as u32,
        DIRECTORY_FLAG,
    ));
    padded(&mut pvd[190..813], "");
    for date in [813, 830, 847, 864] {
        pvd[date..date + 16].fill(b'0');
    }
    pvd[881] = 1;

    let terminator = sector(&mut image, TERMINATOR_SECTOR);
    terminator[0] = 255;
    terminator[1..6].copy_from_slice(STANDARD_ID);
    terminator[6] = 1;

    image[L_PATH_TABLE_SECTOR as usize * SECTOR_SIZE..][..PATH_TABLE_SIZE as usize]
        .copy_from_slice(&path_table(ROOT_SECTOR, false));
    image[M_PATH_TABLE_SECTOR as usize * SECTOR_SIZE..][..PATH_TABLE_SIZE as usize]
        .copy_from_slice(&path_table(ROOT_SECTOR, true));

    let mut root = Vec::new();
    root.extend(directory_record(&[0], ROOT_SECTOR, SECTOR_SIZE as u32, DIRECTORY_FLAG));
    root.extend(directory_record(&[1], ROOT_SECTOR, SECTOR_SIZE as u32, DIRECTORY_FLAG));
    root.extend(directory_record(
        format!("{};1", name).as_bytes(),
        DATA_SECTOR,
        contents.len() as u32,
        0,
    ));
    sector(&mut image, ROOT_SECTOR as usize)[..root.len()].copy_from_slice(&root);

    let data = DATA_SECTOR as usize * SECTOR_SIZE;
    image[data..data + contents.len()].copy_from_slice(contents);

    Ok(image)
}

/// Read `name` from the root directory of an image, matching `NAME`, `NAME;1` and
/// `NAME.;1` case-insensitively
pub fn read_file(image: &[u8], name: &str) -> Result<Vec<u8>> {
    let pvd = image
        .get(PVD_SECTOR * SECTOR_SIZE..(PVD_SECTOR + 1) * SECTOR_SIZE)
        .ok_or_else(|| Error::Iso("image too small".to_string()))?;
    if pvd[0] != 1 || &pvd[1..6] != STANDARD_ID {
        return Err(Error::Iso("no primary volume descriptor".to_string()));
    }

    let root_extent = le_u32(&pvd[156 + 2..]) as usize * SECTOR_SIZE;
    let root_size = le_u32(&pvd[156 + 10..]) as usize;
    let root = image
        .get(root_extent..root_extent + root_size)
        .ok_or_else(|| Error::Iso("root directory outside image".to_string()))?;

    let wanted = [
        name.to_uppercase(),
        format!("{};1", name.to_uppercase()),
        format!("{}.;1", name.to_uppercase()),
    ];

    let mut pos = 0;
    while pos < root.len() {
        let len = root[pos] as usize;
        if len == 0 {
            // records never cross sector boundaries
            pos = (pos / SECTOR_SIZE + 1) * SECTOR_SIZE;
            continue;
        }
        let record = root
            .get(pos..pos + len)
            .filter(|r| r.len() >= 33)
            .ok_or_else(|| Error::Iso("truncated directory record".to_string()))?;

        let id_len = record[32] as usize;
        let id = record
            .get(33..33 + id_len)
            .ok_or_else(|| Error::Iso("truncated file identifier".to_string()))?;
        let id = String::from_utf8_lossy(id).to_uppercase();

        if record[25] & DIRECTORY_FLAG == 0 && wanted.contains(&id) {
            let extent = le_u32(&record[2..]) as usize * SECTOR_SIZE;
            let size = le_u32(&record[10..]) as usize;
            return image
                .get(extent..extent + size)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::Iso(format!("{} extends past the image", name)));
        }
        pos += len;
    }

    Err(Error::Iso(format!("{} not found in image", name)))
}

#[test]
fn test_build_layout() {
    let image = build("ENV", b"{}").unwrap();
    assert_eq!(image.len(), IMAGE_SIZE);

    let pvd = &image[16 * SECTOR_SIZE..];
    assert_eq!(&pvd[1..6], b"CD001");
    assert_eq!(le_u32(&pvd[80..]), 512);
    assert_eq!(image[17 * SECTOR_SIZE], 255);
    assert_eq!(&image[21 * SECTOR_SIZE..21 * SECTOR_SIZE + 2], b"{}");
}

#[test]
fn test_read_back() {
    let contents = br#"{"agent_id":"agent-1"}"#;
    let image = build("ENV", contents).unwrap();

    assert_eq!(read_file(&image, "ENV").unwrap(), contents);
    assert_eq!(read_file(&image, "env").unwrap(), contents);
    assert!(matches!(read_file(&image, "OTHER"), Err(Error::Iso(_))));
}

#[test]
fn test_read_accepts_versioned_names() {
    let mut image = build("ENV", b"abc").unwrap();

    // rename ENV;1 to ENV.;1 as other mastering tools write it
    let root = ROOT_SECTOR as usize * SECTOR_SIZE;
    let record = root + 34 + 34;
    let renamed = directory_record(b"ENV.;1", DATA_SECTOR, 3, 0);
    image[record..record + renamed.len()].copy_from_slice(&renamed);

    assert_eq!(read_file(&image, "ENV").unwrap(), b"abc");
}

#[test]
fn test_oversized_and_invalid() {
    let too_big = vec![0u8; MAX_FILE_SIZE + 1];
    assert!(matches!(build("ENV", &too_big), Err(Error::Iso(_))));
    assert!(build("ENV", &vec![b'x'; MAX_FILE_SIZE]).is_ok());
    assert!(matches!(build("env.json", b"{}"), Err(Error::Iso(_))));
    assert!(matches!(read_file(&[0u8; 100], "ENV"), Err(Error::Iso(_))));
}
