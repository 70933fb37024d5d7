use clap::ValueEnum;
use slicedl::HashAlgorithm;

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum HashChoice {
    #[default]
    Md5,
    Sha256,
}

impl From<HashChoice> for HashAlgorithm {
    fn from(choice: HashChoice) -> Self {
        match choice {
            HashChoice::Md5 => HashAlgorithm::Md5,
            HashChoice::Sha256 => HashAlgorithm::Sha256,
        }
    }
}
