pub mod age_gender_lite;
