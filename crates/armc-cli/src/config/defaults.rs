pub struct DefaultsConfig {
    pub iter_len: usize,
    pub sub_iter_len: usize,
    pub phi: f64,
    pub gamma: f64,
    pub a_target: f64,
    pub history_file: &'static str,
    pub job_path: &'static str,
    pub job_folder: &'static str,
    pub job_output: &'static str,
    pub keep_files: bool,
    pub rdf_descriptor: &'static str,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            iter_len: 50000,
            sub_iter_len: 100,
            phi: 1.0,
            gamma: 2.0,
            a_target: 0.25,
            history_file: "armc.hdf5",
            job_path: ".",
            job_folder: "armc_jobs",
            job_output: "trajectory.xyz",
            keep_files: true,
            rdf_descriptor: "rdf",
        }
    }
}
