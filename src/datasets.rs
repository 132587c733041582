//! Download and local storage of the public atlases and the resting-state fMRI cohort.
//!
//! Every dataset lives in its own sub directory of the data directory. Archives are downloaded
//! on first use, the needed members are extracted and the archive is removed. Later calls find
//! the extracted files and do not touch the network.

use flate2::read::GzDecoder;
use log::{debug, info, warn};

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::atlas::AtlasSet;
use crate::error::{ConnectomeError, Result};

const DESTRIEUX_URL: &str = "https://www.nitrc.org/frs/download.php/11942/destrieux2009.tgz";
const YEO_URL: &str = "https://surfer.nmr.mgh.harvard.edu/pub/data/Yeo_JNeurophysiol11_MNI152.zip";
const HARVARD_OXFORD_URL: &str = "https://www.nitrc.org/frs/download.php/9902/HarvardOxford.tgz";
const NITRC_DOWNLOAD_URL: &str = "https://www.nitrc.org/frs/download.php";
/// NITRC file id of the ADHD metadata archive. The subject archives follow with consecutive ids.
const ADHD_METADATA_FILE_ID: usize = 7781;

/// The subjects of the 40 subject ADHD-200 resting-state sample, in download order.
pub const ADHD_SUBJECT_IDS: [&str; 40] = [
    "0010042", "0010064", "0010128", "0021019", "0023008", "0023012", "0027011", "0027018", "0027034", "0027037",
    "1019436", "1206380", "1418396", "1517058", "1552181", "1562298", "1679142", "2014113", "2497695", "2950754",
    "3007585", "3154996", "3205761", "3520880", "3624598", "3699991", "3884955", "3902469", "3994098", "4016887",
    "4046678", "4134561", "4164316", "4275075", "6115230", "7774305", "8409791", "8697774", "9744150", "9750701",
];

/// Display names of the atlases compared by the demo.
pub const DESTRIEUX_DISPLAY_NAME: &str = "Destrieux Atlas (struct)";
pub const YEO_DISPLAY_NAME: &str = "Yeo Atlas 17 thick (func)";
pub const HARVARD_OXFORD_DISPLAY_NAME: &str = "Harvard Oxford > 25% (struct)";
pub const HARVARD_OXFORD_DEFAULT_NAME: &str = "cort-maxprob-thr25-2mm";


/// The Destrieux 2009 sulcal-gyral parcellation.
#[derive(Debug, Clone, PartialEq)]
pub struct DestrieuxAtlas {
    /// Lateralized label image.
    pub maps: PathBuf,
    /// Table of label indices and region names.
    pub labels: PathBuf,
}

/// The Yeo 2011 resting-state network parcellations, in MNI152 space.
#[derive(Debug, Clone, PartialEq)]
pub struct YeoAtlas {
    pub thin_7: PathBuf,
    pub thick_7: PathBuf,
    pub thin_17: PathBuf,
    pub thick_17: PathBuf,
    pub colors_7: PathBuf,
    pub colors_17: PathBuf,
    pub anat: PathBuf,
}

/// One of the Harvard-Oxford cortical or subcortical atlases.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvardOxfordAtlas {
    pub name: String,
    pub maps: PathBuf,
}

/// The inputs of one subject: a 4D functional image and its confounds table.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRecord {
    pub func: PathBuf,
    pub confounds: PathBuf,
}

/// A cohort of functional images with one confounds table per image, index-aligned by subject.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionalDataset {
    func: Vec<PathBuf>,
    confounds: Vec<PathBuf>,
    /// Phenotypic information on the subjects, if available.
    pub phenotypic: Option<PathBuf>,
}

impl FunctionalDataset {
    /// Fails if the number of functional images and confounds tables differ.
    pub fn new(func: Vec<PathBuf>, confounds: Vec<PathBuf>) -> Result<FunctionalDataset> {
        if func.len() != confounds.len() {
            return Err(ConnectomeError::ShapeMismatch(format!(
                "{} functional images, but {} confounds tables",
                func.len(),
                confounds.len()
            )));
        }
        Ok(FunctionalDataset { func, confounds, phenotypic: None })
    }

    pub fn func(&self) -> &[PathBuf] {
        &self.func
    }

    pub fn confounds(&self) -> &[PathBuf] {
        &self.confounds
    }

    pub fn len(&self) -> usize {
        self.func.len()
    }

    pub fn is_empty(&self) -> bool {
        self.func.is_empty()
    }

    pub fn subjects(&self) -> impl Iterator<Item = SubjectRecord> + '_ {
        self.func
            .iter()
            .zip(self.confounds.iter())
            .map(|(f, c)| SubjectRecord { func: f.clone(), confounds: c.clone() })
    }
}


/// All known Harvard-Oxford atlas names, like `cort-maxprob-thr25-2mm` or `sub-prob-1mm`.
pub fn harvard_oxford_names() -> Vec<String> {
    let mut names = Vec::new();
    for part in ["cort", "cortl", "sub"].iter() {
        for kind in ["maxprob-thr0", "maxprob-thr25", "maxprob-thr50", "prob"].iter() {
            for res in ["1mm", "2mm"].iter() {
                names.push(format!("{}-{}-{}", part, kind, res));
            }
        }
    }
    names
}

/// Downloads archives into a local data directory and extracts the files needed from them.
#[derive(Debug, Clone)]
pub struct Fetcher {
    data_dir: PathBuf,
    client: reqwest::blocking::Client,
}

impl Fetcher {

    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Result<Fetcher> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("neuroconnectome/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Fetcher { data_dir: data_dir.into(), client })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Fetch the Destrieux 2009 atlas.
    pub fn fetch_atlas_destrieux_2009(&self) -> Result<DestrieuxAtlas> {
        let files = self.fetch_archive_members(
            "destrieux_2009",
            DESTRIEUX_URL,
            &["destrieux2009_rois_lateralized.nii.gz", "destrieux2009_rois_labels_lateralized.csv"],
        )?;
        Ok(DestrieuxAtlas { maps: files[0].clone(), labels: files[1].clone() })
    }

    /// Fetch the Yeo 2011 atlas. The demo uses the thick 17-network parcellation.
    pub fn fetch_atlas_yeo_2011(&self) -> Result<YeoAtlas> {
        let members: Vec<String> = [
            "Yeo2011_7Networks_MNI152_FreeSurferConformed1mm.nii.gz",
            "Yeo2011_7Networks_MNI152_FreeSurferConformed1mm_LiberalMask.nii.gz",
            "Yeo2011_17Networks_MNI152_FreeSurferConformed1mm.nii.gz",
            "Yeo2011_17Networks_MNI152_FreeSurferConformed1mm_LiberalMask.nii.gz",
            "Yeo2011_7Networks_ColorLUT.txt",
            "Yeo2011_17Networks_ColorLUT.txt",
            "FSL_MNI152_FreeSurferConformed_1mm.nii.gz",
        ]
        .iter()
        .map(|f| format!("Yeo_JNeurophysiol11_MNI152/{}", f))
        .collect();
        let member_refs: Vec<&str> = members.iter().map(|m| m.as_str()).collect();
        let files = self.fetch_archive_members("yeo_2011", YEO_URL, &member_refs)?;
        Ok(YeoAtlas {
            thin_7: files[0].clone(),
            thick_7: files[1].clone(),
            thin_17: files[2].clone(),
            thick_17: files[3].clone(),
            colors_7: files[4].clone(),
            colors_17: files[5].clone(),
            anat: files[6].clone(),
        })
    }

    /// Fetch the Harvard-Oxford atlas with the given name, see [`harvard_oxford_names`].
    pub fn fetch_atlas_harvard_oxford(&self, name: &str) -> Result<HarvardOxfordAtlas> {
        if !harvard_oxford_names().iter().any(|n| n == name) {
            return Err(ConnectomeError::UnknownAtlasName(name.to_string()));
        }
        let member = format!("HarvardOxford/HarvardOxford-{}.nii.gz", name);
        let files = self.fetch_archive_members("fsl", HARVARD_OXFORD_URL, &[member.as_str()])?;
        Ok(HarvardOxfordAtlas { name: name.to_string(), maps: files[0].clone() })
    }

    /// Fetch the first `n_subjects` subjects of the ADHD-200 resting-state sample.
    ///
    /// At most 40 subjects are available, larger requests are clamped.
    pub fn fetch_adhd(&self, n_subjects: usize) -> Result<FunctionalDataset> {
        if n_subjects == 0 {
            return Err(ConnectomeError::EmptyInput(String::from("at least one subject must be requested")));
        }
        let n = if n_subjects > ADHD_SUBJECT_IDS.len() {
            warn!("Only {} ADHD subjects are available, {} were requested.", ADHD_SUBJECT_IDS.len(), n_subjects);
            ADHD_SUBJECT_IDS.len()
        } else {
            n_subjects
        };

        let metadata_url = format!("{}/{}/adhd40_metadata.tgz", NITRC_DOWNLOAD_URL, ADHD_METADATA_FILE_ID);
        let phenotypic = self.fetch_archive_members("adhd", &metadata_url, &["ADHD200_40subs_motion_parameters_and_phenotypics.csv"])?;

        let mut func = Vec::with_capacity(n);
        let mut confounds = Vec::with_capacity(n);
        for (idx, subject) in ADHD_SUBJECT_IDS.iter().take(n).enumerate() {
            let members = adhd_subject_members(subject);
            let files = self.fetch_archive_members("adhd", &adhd_subject_url(idx), &[members[0].as_str(), members[1].as_str()])?;
            func.push(files[0].clone());
            confounds.push(files[1].clone());
        }
        info!("ADHD dataset with {} subjects is ready in '{}'.", n, self.data_dir.join("adhd").display());
        let mut dataset = FunctionalDataset::new(func, confounds)?;
        dataset.phenotypic = phenotypic.into_iter().next();
        Ok(dataset)
    }

    /// Make sure the given members of the archive at `url` exist below the dataset directory and return their paths.
    ///
    /// Members are relative paths inside the archive. Existing files are reused without any download.
    fn fetch_archive_members(&self, dataset: &str, url: &str, members: &[&str]) -> Result<Vec<PathBuf>> {
        let dest_dir = self.data_dir.join(dataset);
        let targets: Vec<PathBuf> = members.iter().map(|m| dest_dir.join(m)).collect();
        if targets.iter().all(|t| t.is_file()) {
            debug!("Reusing {} files of dataset '{}' from '{}'.", targets.len(), dataset, dest_dir.display());
            return Ok(targets);
        }

        fs::create_dir_all(&dest_dir)?;
        let archive_name = url.rsplit('/').next().unwrap_or(dataset);
        let archive_path = dest_dir.join(archive_name);
        self.download(url, &archive_path)?;
        extract_members(&archive_path, members, &dest_dir)?;
        fs::remove_file(&archive_path)?;

        if let Some(missing) = targets.iter().zip(members.iter()).find(|(t, _)| !t.is_file()) {
            return Err(ConnectomeError::MissingArchiveMember(format!("{} in {}", missing.1, url)));
        }
        Ok(targets)
    }

    /// Download `url` to `dest`, unless the file is already there.
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        if dest.is_file() {
            debug!("Archive '{}' already downloaded.", dest.display());
            return Ok(());
        }
        info!("Downloading '{}'.", url);
        let mut response = self.client.get(url).send()?.error_for_status()?;
        let partial = dest.with_extension("part");
        let mut file = File::create(&partial)?;
        let num_bytes = response.copy_to(&mut file)?;
        fs::rename(&partial, dest)?;
        info!("Downloaded {} bytes to '{}'.", num_bytes, dest.display());
        Ok(())
    }
}

fn adhd_subject_url(idx: usize) -> String {
    format!("{}/{}/adhd40_{}.tgz", NITRC_DOWNLOAD_URL, ADHD_METADATA_FILE_ID + 1 + idx, ADHD_SUBJECT_IDS[idx])
}

fn adhd_subject_members(subject: &str) -> [String; 2] {
    [
        format!("data/{}/{}_rest_tshift_RPI_voreg_mni.nii.gz", subject, subject),
        format!("data/{}/{}_regressors.csv", subject, subject),
    ]
}

/// Extract the entries of a `.zip` or gzipped tar archive whose path ends with one of `members` to `dest_dir`/member.
fn extract_members(archive: &Path, members: &[&str], dest_dir: &Path) -> Result<()> {
    let is_zip = archive.extension().map(|e| e == "zip").unwrap_or(false);
    if is_zip {
        let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
        for idx in 0..zip.len() {
            let mut entry = zip.by_index(idx)?;
            let entry_path = PathBuf::from(entry.name());
            if let Some(member) = matching_member(&entry_path, members) {
                let out_path = prepare_output(dest_dir, member)?;
                io::copy(&mut entry, &mut File::create(&out_path)?)?;
            }
        }
    } else {
        let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive)?));
        for entry in tar.entries()? {
            let mut entry = entry?;
            let entry_path = entry.path()?.into_owned();
            if let Some(member) = matching_member(&entry_path, members) {
                let out_path = prepare_output(dest_dir, member)?;
                entry.unpack(&out_path)?;
            }
        }
    }
    Ok(())
}

fn matching_member<'a>(entry_path: &Path, members: &[&'a str]) -> Option<&'a str> {
    members.iter().copied().find(|m| entry_path.ends_with(m))
}

fn prepare_output(dest_dir: &Path, member: &str) -> Result<PathBuf> {
    let out_path = dest_dir.join(member);
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    debug!("Extracting '{}'.", out_path.display());
    Ok(out_path)
}

/// The atlases compared by the demo, by display name.
pub fn default_atlases(fetcher: &Fetcher) -> Result<AtlasSet> {
    let destrieux = fetcher.fetch_atlas_destrieux_2009()?;
    let yeo = fetcher.fetch_atlas_yeo_2011()?;
    let harvard_oxford = fetcher.fetch_atlas_harvard_oxford(HARVARD_OXFORD_DEFAULT_NAME)?;
    AtlasSet::from_pairs(vec![
        (DESTRIEUX_DISPLAY_NAME, destrieux.maps),
        (YEO_DISPLAY_NAME, yeo.thick_17),
        (HARVARD_OXFORD_DISPLAY_NAME, harvard_oxford.maps),
    ])
}


#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    fn write_tgz(path: &Path, files: &[(&str, &[u8])]) {
        let gz = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, content) in files.iter() {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn datasets_require_aligned_inputs() {
        let res = FunctionalDataset::new(vec![PathBuf::from("a.nii")], vec![]);
        assert!(matches!(res, Err(ConnectomeError::ShapeMismatch(_))));

        let ds = FunctionalDataset::new(vec![PathBuf::from("a.nii"), PathBuf::from("b.nii")], vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")]).unwrap();
        assert_eq!(2, ds.len());
        let subjects: Vec<SubjectRecord> = ds.subjects().collect();
        assert_eq!(PathBuf::from("b.csv"), subjects[1].confounds);
    }

    #[test]
    fn unknown_harvard_oxford_atlases_are_rejected() {
        let dir = tempdir().unwrap();
        let fetcher = Fetcher::new(dir.path()).unwrap();
        let res = fetcher.fetch_atlas_harvard_oxford("cort-maxprob-thr30-2mm");
        assert!(matches!(res, Err(ConnectomeError::UnknownAtlasName(_))));
        assert_eq!(24, harvard_oxford_names().len());
        assert!(harvard_oxford_names().contains(&String::from(HARVARD_OXFORD_DEFAULT_NAME)));
    }

    #[test]
    fn zero_subjects_are_rejected() {
        let dir = tempdir().unwrap();
        let fetcher = Fetcher::new(dir.path()).unwrap();
        assert!(matches!(fetcher.fetch_adhd(0), Err(ConnectomeError::EmptyInput(_))));
    }

    #[test]
    fn subject_archives_have_consecutive_ids() {
        assert_eq!("https://www.nitrc.org/frs/download.php/7782/adhd40_0010042.tgz", adhd_subject_url(0));
        assert_eq!("https://www.nitrc.org/frs/download.php/7821/adhd40_9750701.tgz", adhd_subject_url(39));
        assert_eq!("data/0010042/0010042_regressors.csv", adhd_subject_members("0010042")[1]);
    }

    #[test]
    fn existing_files_are_reused_without_download() {
        let dir = tempdir().unwrap();
        let ho_dir = dir.path().join("fsl").join("HarvardOxford");
        fs::create_dir_all(&ho_dir).unwrap();
        let maps = ho_dir.join("HarvardOxford-cort-maxprob-thr25-2mm.nii.gz");
        fs::write(&maps, b"placeholder").unwrap();

        let fetcher = Fetcher::new(dir.path()).unwrap();
        let atlas = fetcher.fetch_atlas_harvard_oxford(HARVARD_OXFORD_DEFAULT_NAME).unwrap();
        assert_eq!(maps, atlas.maps);
    }

    #[test]
    fn only_requested_tar_members_are_extracted() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("adhd40_0010042.tgz");
        write_tgz(
            &archive,
            &[
                ("./data/0010042/0010042_regressors.csv", b"csf\twm\n1\t2\n"),
                ("./data/0010042/0010042_rest_tshift_RPI_voreg_mni.nii.gz", b"image"),
                ("./data/0010042/0010042_anat.nii.gz", b"anat"),
            ],
        );
        let members = adhd_subject_members("0010042");
        let member_refs: Vec<&str> = members.iter().map(|m| m.as_str()).collect();
        let dest = dir.path().join("adhd");
        extract_members(&archive, &member_refs, &dest).unwrap();

        assert_eq!(b"image".to_vec(), fs::read(dest.join(&members[0])).unwrap());
        assert!(dest.join(&members[1]).is_file());
        assert!(!dest.join("data/0010042/0010042_anat.nii.gz").exists());
    }
}
