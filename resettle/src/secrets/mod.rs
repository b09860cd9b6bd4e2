mod keepassxc;

pub use keepassxc::KeepassXc;
